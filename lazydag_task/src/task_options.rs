use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct TaskOptions {
    pub max_attempts: usize,
    pub retry_delay: Duration,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
        }
    }
}
