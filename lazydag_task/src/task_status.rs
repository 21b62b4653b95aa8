use serde::{Deserialize, Serialize};

#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    RetryPending,
    Success,
    Failure,
    Skipped,
}

impl TaskStatus {
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Skipped
        )
    }
}
