//! In-process cache of the step each running task is currently executing.
//!
//! The durable task row only moves at stage boundaries; this cache answers
//! "where is it right now" without a database read. Entries are evicted
//! when a task suspends or terminates, so a miss means "not running here;
//! check the task record".

use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

use crate::types::{Step, TaskId};

#[derive(Clone, Debug, Default)]
pub struct LiveStepCache {
    inner: Arc<Mutex<FxHashMap<TaskId, Step>>>,
}

impl LiveStepCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, task_id: &str, step: Step) {
        self.inner
            .lock()
            .expect("live step cache mutex poisoned")
            .insert(task_id.to_string(), step);
    }

    pub fn get(&self, task_id: &str) -> Option<Step> {
        self.inner
            .lock()
            .expect("live step cache mutex poisoned")
            .get(task_id)
            .copied()
    }

    pub fn evict(&self, task_id: &str) {
        self.inner
            .lock()
            .expect("live step cache mutex poisoned")
            .remove(task_id);
    }
}
