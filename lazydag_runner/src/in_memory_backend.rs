use std::{
    collections::{BTreeSet, BinaryHeap, HashMap, HashSet},
    sync::Arc,
};

use crate::{run::Run, Backend};
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use lazydag_task::{
    ordered_queued_task::OrderedQueuedTask, queued_task::QueuedTask, task_result::TaskResult,
    task_status::TaskStatus, Task, TaskFunction,
};
use parking_lot::Mutex;
use serde_json::Value;

/// Process-local backend. Clones share state, so every worker thread gets
/// its own handle onto the same run.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    pub name: String,
    pub functions: Arc<HashMap<String, TaskFunction>>,
    pub task_results: Arc<Mutex<HashMap<usize, TaskResult>>>,
    pub task_statuses: Arc<Mutex<HashMap<usize, TaskStatus>>>,
    pub queued_attempts: Arc<Mutex<HashMap<usize, usize>>>,
    pub dependencies: Arc<Mutex<HashMap<usize, BTreeSet<usize>>>>,
    pub default_edges: Arc<HashSet<(usize, usize)>>,
    pub edges: Arc<Mutex<HashSet<(usize, usize)>>>,
    pub default_nodes: Arc<Vec<Task>>,
    pub nodes: Arc<Mutex<Vec<Task>>>,
    pub task_depth: Arc<Mutex<HashMap<usize, usize>>>,
    pub priority_queue: Arc<Mutex<BinaryHeap<OrderedQueuedTask>>>,
}

impl InMemoryBackend {
    pub fn new(
        name: &str,
        nodes: &[Task],
        edges: &HashSet<(usize, usize)>,
        functions: HashMap<String, TaskFunction>,
    ) -> Self {
        Self {
            name: name.to_string(),
            functions: Arc::new(functions),
            default_edges: Arc::new(edges.clone()),
            default_nodes: Arc::new(nodes.to_vec()),
            ..Default::default()
        }
    }

    fn task_depth_on_path(
        &self,
        run_id: usize,
        task_id: usize,
        path: &mut Vec<usize>,
    ) -> Result<usize> {
        if let Some(depth) = self.task_depth.lock().get(&task_id) {
            return Ok(*depth);
        }
        if path.contains(&task_id) {
            bail!("task_id {task_id} is part of a dependency cycle");
        }

        path.push(task_id);
        let mut max_depth = 0;
        for upstream_id in self.get_upstream(run_id, task_id)? {
            max_depth = max_depth.max(self.task_depth_on_path(run_id, upstream_id, path)? + 1);
        }
        path.pop();

        self.task_depth.lock().insert(task_id, max_depth);
        Ok(max_depth)
    }
}

impl Backend for InMemoryBackend {
    fn create_new_run(&mut self, scheduled_date_for_run: DateTime<Utc>) -> Result<Run> {
        Ok(Run {
            run_id: 0,
            name: self.get_name()?,
            scheduled_date_for_run,
        })
    }

    fn get_name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    fn get_function(&self, function_name: &str) -> Result<TaskFunction> {
        self.functions.get(function_name).cloned().ok_or_else(|| {
            anyhow!(
                "no such function '{function_name}'\navailable functions: {:?}",
                self.functions.keys().collect::<Vec<&String>>()
            )
        })
    }

    fn get_default_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.default_nodes.to_vec())
    }

    fn get_default_edges(&self) -> Result<HashSet<(usize, usize)>> {
        Ok(self.default_edges.as_ref().clone())
    }

    fn append_task(&mut self, _run_id: usize, task: &Task) -> Result<usize> {
        let mut nodes = self.nodes.lock();
        let new_id = nodes.len();
        nodes.push(Task {
            id: new_id,
            ..task.clone()
        });
        Ok(new_id)
    }

    fn get_all_tasks(&self, _run_id: usize) -> Result<Vec<Task>> {
        Ok(self.nodes.lock().clone())
    }

    fn get_task_by_id(&self, _run_id: usize, task_id: usize) -> Result<Task> {
        self.nodes
            .lock()
            .get(task_id)
            .cloned()
            .ok_or_else(|| anyhow!("task_id {task_id} does not exist!"))
    }

    fn get_template_args(&self, run_id: usize, task_id: usize) -> Result<Value> {
        Ok(self.get_task_by_id(run_id, task_id)?.template_args)
    }

    fn insert_edge(&mut self, _run_id: usize, edge: (usize, usize)) -> Result<()> {
        self.edges.lock().insert(edge);
        Ok(())
    }

    fn get_upstream(&self, _run_id: usize, task_id: usize) -> Result<Vec<usize>> {
        let mut upstream: Vec<usize> = self
            .edges
            .lock()
            .iter()
            .filter(|(_, downstream)| downstream == &task_id)
            .map(|(upstream, _)| *upstream)
            .collect();
        upstream.sort();
        Ok(upstream)
    }

    fn get_downstream(&self, _run_id: usize, task_id: usize) -> Result<Vec<usize>> {
        let mut downstream: Vec<usize> = self
            .edges
            .lock()
            .iter()
            .filter(|(upstream_id, _)| upstream_id == &task_id)
            .map(|(_, downstream_id)| *downstream_id)
            .collect();
        downstream.sort();
        Ok(downstream)
    }

    fn get_dependencies(&self, _run_id: usize, task_id: usize) -> Result<BTreeSet<usize>> {
        Ok(self
            .dependencies
            .lock()
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    fn set_dependency(
        &mut self,
        _run_id: usize,
        task_id: usize,
        upstream_id: usize,
    ) -> Result<()> {
        self.dependencies
            .lock()
            .entry(task_id)
            .or_default()
            .insert(upstream_id);
        Ok(())
    }

    fn get_task_depth(&mut self, run_id: usize, task_id: usize) -> Result<usize> {
        self.task_depth_on_path(run_id, task_id, &mut vec![])
    }

    fn get_task_status(&self, _run_id: usize, task_id: usize) -> Result<TaskStatus> {
        Ok(self
            .task_statuses
            .lock()
            .get(&task_id)
            .copied()
            .unwrap_or(TaskStatus::Pending))
    }

    fn set_task_status(
        &mut self,
        _run_id: usize,
        task_id: usize,
        task_status: TaskStatus,
    ) -> Result<()> {
        self.task_statuses.lock().insert(task_id, task_status);
        Ok(())
    }

    fn get_task_result(&self, _run_id: usize, task_id: usize) -> Result<Option<TaskResult>> {
        Ok(self.task_results.lock().get(&task_id).cloned())
    }

    fn insert_task_results(&mut self, _run_id: usize, result: &TaskResult) -> Result<()> {
        self.task_results
            .lock()
            .insert(result.task_id, result.clone());
        Ok(())
    }

    fn enqueue_task(&mut self, run_id: usize, task_id: usize, attempt: usize) -> Result<bool> {
        let depth = self.get_task_depth(run_id, task_id)?;

        {
            let mut queued_attempts = self.queued_attempts.lock();
            let last = queued_attempts.entry(task_id).or_insert(0);
            if *last >= attempt {
                return Ok(false);
            }
            *last = attempt;
        }

        self.priority_queue.lock().push(OrderedQueuedTask {
            score: depth,
            queued_task: QueuedTask {
                task_id,
                run_id,
                attempt,
            },
        });
        Ok(true)
    }

    fn pop_priority_queue(&mut self) -> Result<Option<OrderedQueuedTask>> {
        Ok(self.priority_queue.lock().pop())
    }

    fn get_queue_length(&self) -> Result<usize> {
        Ok(self.priority_queue.lock().len())
    }
}
