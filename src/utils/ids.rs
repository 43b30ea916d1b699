//! Identifier generation for tasks and roadmaps.
//!
//! Roadmap ids are human-readable: a slug of the goal text plus a short
//! random suffix, e.g. `learn-rust-web-backends-x4k2qa`. Task ids are
//! UUIDs. A seeded generator produces a deterministic stream of both,
//! which keeps replayed executions byte-for-byte comparable.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use uuid::Uuid;

const SUFFIX_LEN: usize = 6;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_SLUG_LEN: usize = 40;

/// Source of task and roadmap identifiers.
///
/// The default generator draws from OS entropy (via a UUID-derived seed)
/// and uses UUID v4 task ids. [`IdGenerator::seeded`] switches to a fully
/// deterministic stream.
#[derive(Debug)]
pub struct IdGenerator {
    rng: Mutex<StdRng>,
    deterministic: bool,
}

impl IdGenerator {
    pub fn new() -> Self {
        let entropy = Uuid::new_v4().as_u128();
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(
                (entropy as u64) ^ ((entropy >> 64) as u64),
            )),
            deterministic: false,
        }
    }

    /// Deterministic generator: identical seeds yield identical id
    /// sequences for identical call orders.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            deterministic: true,
        }
    }

    pub fn task_id(&self) -> String {
        if self.deterministic {
            let mut rng = self.rng.lock().expect("id rng mutex poisoned");
            format!("task-{:016x}", rng.random_range(0..u64::MAX))
        } else {
            Uuid::new_v4().to_string()
        }
    }

    /// Roadmap id derived from the goal: slug plus random suffix. The
    /// suffix keeps ids unique across tasks sharing a goal.
    pub fn roadmap_id(&self, goal: &str) -> String {
        format!("{}-{}", slugify(goal), self.suffix(SUFFIX_LEN))
    }

    pub fn suffix(&self, len: usize) -> String {
        let mut rng = self.rng.lock().expect("id rng mutex poisoned");
        (0..len)
            .map(|_| {
                let idx = rng.random_range(0..SUFFIX_ALPHABET.len());
                SUFFIX_ALPHABET[idx] as char
            })
            .collect()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, hyphen-separated slug of arbitrary text. Non-alphanumeric
/// runs collapse into single hyphens; the result is trimmed and capped.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len().min(MAX_SLUG_LEN));
    let mut last_hyphen = true;
    for c in text.chars() {
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "roadmap".to_string()
    } else {
        trimmed.to_string()
    }
}
