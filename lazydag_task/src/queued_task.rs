use serde::{Deserialize, Serialize};

#[derive(Debug, Eq, PartialEq, Deserialize, Serialize, Hash, Clone)]
pub struct QueuedTask {
    pub task_id: usize,
    pub run_id: usize,
    pub attempt: usize,
}
