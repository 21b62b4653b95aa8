use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use lazydag_task::{
    ordered_queued_task::OrderedQueuedTask, task_result::TaskResult, task_status::TaskStatus, Task,
    TaskFunction,
};
use serde_json::Value;

use crate::run::Run;

/// Storage seam of the runner. Scheduling logic lives in
/// [`BlanketBackend`](crate::blanket_backend::BlanketBackend), which is
/// implemented for every `Backend`.
pub trait Backend {
    fn create_new_run(&mut self, scheduled_date_for_run: DateTime<Utc>) -> Result<Run>;
    fn get_name(&self) -> Result<String>;

    fn get_function(&self, function_name: &str) -> Result<TaskFunction>;

    fn get_default_tasks(&self) -> Result<Vec<Task>>;
    fn get_default_edges(&self) -> Result<HashSet<(usize, usize)>>;

    fn append_task(&mut self, run_id: usize, task: &Task) -> Result<usize>;
    fn get_all_tasks(&self, run_id: usize) -> Result<Vec<Task>>;
    fn get_task_by_id(&self, run_id: usize, task_id: usize) -> Result<Task>;
    fn get_template_args(&self, run_id: usize, task_id: usize) -> Result<Value>;

    fn insert_edge(&mut self, run_id: usize, edge: (usize, usize)) -> Result<()>;
    fn get_upstream(&self, run_id: usize, task_id: usize) -> Result<Vec<usize>>;
    fn get_downstream(&self, run_id: usize, task_id: usize) -> Result<Vec<usize>>;

    fn get_dependencies(&self, run_id: usize, task_id: usize) -> Result<BTreeSet<usize>>;
    fn set_dependency(&mut self, run_id: usize, task_id: usize, upstream_id: usize)
        -> Result<()>;

    fn get_task_depth(&mut self, run_id: usize, task_id: usize) -> Result<usize>;

    fn get_task_status(&self, run_id: usize, task_id: usize) -> Result<TaskStatus>;
    fn set_task_status(
        &mut self,
        run_id: usize,
        task_id: usize,
        task_status: TaskStatus,
    ) -> Result<()>;

    fn get_task_result(&self, run_id: usize, task_id: usize) -> Result<Option<TaskResult>>;
    fn insert_task_results(&mut self, run_id: usize, result: &TaskResult) -> Result<()>;

    /// Queues `attempt` of a task. Returns `false` when that attempt (or a
    /// later one) was already queued, so concurrent upstream completions
    /// cannot queue a task twice.
    fn enqueue_task(&mut self, run_id: usize, task_id: usize, attempt: usize) -> Result<bool>;
    fn pop_priority_queue(&mut self) -> Result<Option<OrderedQueuedTask>>;
    fn get_queue_length(&self) -> Result<usize>;
}
