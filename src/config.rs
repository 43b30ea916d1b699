//! Engine configuration with environment-variable overrides.
//!
//! Every knob has a built-in default, so `EngineConfig::default()` is a
//! working configuration. [`EngineConfig::from_env`] layers `WAYMARK_*`
//! variables on top (a `.env` file is honored via `dotenvy`):
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `WAYMARK_MAX_MODIFICATIONS` | validate/edit loop bound | `3` |
//! | `WAYMARK_VALIDATION_THRESHOLD` | minimum passing score | `70.0` |
//! | `WAYMARK_FANOUT_MAX_UNITS` | concurrent units in fan-out | `8` |
//! | `WAYMARK_FANOUT_MAX_DB_SESSIONS` | concurrent persistence scopes | `4` |
//! | `WAYMARK_FANOUT_RETRY_ATTEMPTS` | attempts per agent call | `2` |
//! | `WAYMARK_FANOUT_RETRY_BACKOFF_MS` | fixed pause between attempts | `250` |
//! | `WAYMARK_RECOVERY_MAX_AGE_SECS` | interrupted-task age cutoff | `3600` |
//! | `WAYMARK_RECOVERY_MAX_CONCURRENT` | parallel recovery resumptions | `3` |
//! | `WAYMARK_RECOVERY_STAGGER_MS` | delay between resumption launches | `500` |
//! | `WAYMARK_TXN_TIMEOUT_MS` | per-scope transaction deadline | `30000` |

use std::str::FromStr;
use std::time::Duration;

/// Top-level engine configuration. Cheap to clone; handed to the executor
/// once at construction.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on the validate/edit loop counter before the router
    /// forces the pipeline onward to human review.
    pub max_modifications: u32,
    /// Weighted score a framework must reach to be considered valid.
    pub validation_threshold: f64,
    pub fanout: FanoutConfig,
    pub recovery: RecoveryConfig,
    pub txn: TxnConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_modifications: 3,
            validation_threshold: 70.0,
            fanout: FanoutConfig::default(),
            recovery: RecoveryConfig::default(),
            txn: TxnConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            max_modifications: env_or("WAYMARK_MAX_MODIFICATIONS", defaults.max_modifications),
            validation_threshold: env_or(
                "WAYMARK_VALIDATION_THRESHOLD",
                defaults.validation_threshold,
            ),
            fanout: FanoutConfig {
                max_concurrent_units: env_or(
                    "WAYMARK_FANOUT_MAX_UNITS",
                    defaults.fanout.max_concurrent_units,
                ),
                max_db_sessions: env_or(
                    "WAYMARK_FANOUT_MAX_DB_SESSIONS",
                    defaults.fanout.max_db_sessions,
                ),
                retry_attempts: env_or(
                    "WAYMARK_FANOUT_RETRY_ATTEMPTS",
                    defaults.fanout.retry_attempts,
                ),
                retry_backoff: Duration::from_millis(env_or(
                    "WAYMARK_FANOUT_RETRY_BACKOFF_MS",
                    defaults.fanout.retry_backoff.as_millis() as u64,
                )),
            },
            recovery: RecoveryConfig {
                max_age: Duration::from_secs(env_or(
                    "WAYMARK_RECOVERY_MAX_AGE_SECS",
                    defaults.recovery.max_age.as_secs(),
                )),
                max_concurrent: env_or(
                    "WAYMARK_RECOVERY_MAX_CONCURRENT",
                    defaults.recovery.max_concurrent,
                ),
                stagger: Duration::from_millis(env_or(
                    "WAYMARK_RECOVERY_STAGGER_MS",
                    defaults.recovery.stagger.as_millis() as u64,
                )),
            },
            txn: TxnConfig {
                scope_timeout: Duration::from_millis(env_or(
                    "WAYMARK_TXN_TIMEOUT_MS",
                    defaults.txn.scope_timeout.as_millis() as u64,
                )),
            },
        }
    }
}

/// Limits for the per-unit content fan-out.
///
/// Two independent throttles: `max_concurrent_units` bounds how many units
/// generate content at once (agent-call concurrency), `max_db_sessions`
/// bounds how many persistence transactions are open at once. The second
/// is typically smaller: agent calls are slow and parallel, SQLite writes
/// are fast and contended.
#[derive(Clone, Debug)]
pub struct FanoutConfig {
    pub max_concurrent_units: usize,
    pub max_db_sessions: usize,
    /// Total attempts per agent call (1 = no retry).
    pub retry_attempts: u32,
    /// Fixed pause between retry attempts.
    pub retry_backoff: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: 8,
            max_db_sessions: 4,
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Limits for the startup recovery scan.
#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    /// Interrupted tasks older than this are left alone.
    pub max_age: Duration,
    /// Concurrent resumptions.
    pub max_concurrent: usize,
    /// Launch delay between consecutive resumptions, to avoid a thundering
    /// herd of agent calls right after a restart.
    pub stagger: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600),
            max_concurrent: 3,
            stagger: Duration::from_millis(500),
        }
    }
}

/// Transaction scope settings.
#[derive(Clone, Debug)]
pub struct TxnConfig {
    /// Deadline for one scope, covering the agent call and the durable
    /// writes it feeds. Elapsing rolls back the whole transaction.
    pub scope_timeout: Duration,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            scope_timeout: Duration::from_secs(30),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
