use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::queued_task::QueuedTask;

/// Priority queue entry. `BinaryHeap` is a max-heap, so the ordering is
/// reversed: the shallowest task (lowest `score`) pops first, ties broken by
/// the lowest task id.
#[derive(Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OrderedQueuedTask {
    pub score: usize,
    pub queued_task: QueuedTask,
}

impl Ord for OrderedQueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| other.queued_task.task_id.cmp(&self.queued_task.task_id))
    }
}

impl PartialOrd for OrderedQueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
