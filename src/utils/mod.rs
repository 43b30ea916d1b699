//! Small shared helpers: identifier generation and payload extraction.

pub mod extract;
pub mod ids;
