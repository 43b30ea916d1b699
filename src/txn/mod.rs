//! Transaction scopes: the persistence boundary every stage writes inside.
//!
//! A [`TransactionScope`] wraps one SQLite transaction. Nested [`enter`]
//! calls map to savepoints, and [`exit`] applies the rollback policy from
//! [`crate::fault::rollback_scope`]: contained faults undo only the
//! innermost savepoint, hard faults tear down the whole transaction and
//! poison the scope. [`with_scope`] adds the deadline: a scope that
//! outlives its timer is rolled back in full no matter what it was doing.
//!
//! [`enter`]: TransactionScope::enter
//! [`exit`]: TransactionScope::exit

mod scope;

pub use scope::{ExitOutcome, ScopeOptions, TransactionScope, with_scope};
