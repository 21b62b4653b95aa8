use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use lazydag_runner::{
    backend::Backend,
    blanket_backend::BlanketBackend,
    in_memory_backend::InMemoryBackend,
    run::{Run, RunStatus},
    run_in_memory,
};
use lazydag_task::{task_result::TaskResult, task_status::TaskStatus, Task};
use lazydag_utils::get_default_max_parallelism;
use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    circular_dependencies::describe_circular_dependencies,
    delayed::Delayed,
    graph::Graph,
    visualize::{render_graph, GraphFormat},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub n_workers: usize,

    /// Process based workers. Only thread workers exist, so `true` is
    /// rejected by [`Client::new`].
    pub processes: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            n_workers: get_default_max_parallelism(),
            processes: false,
        }
    }
}

/// A local pool of worker threads that executes [`Graph`]s.
#[derive(Debug, Clone)]
pub struct Client {
    options: ClientOptions,
}

impl Client {
    pub fn new(options: ClientOptions) -> Result<Self> {
        if options.n_workers == 0 {
            bail!("a client needs at least one worker");
        }
        if options.processes {
            bail!("process based workers are not supported, use processes = false");
        }

        info!("started local client with {} workers", options.n_workers);
        Ok(Self { options })
    }

    pub fn n_workers(&self) -> usize {
        self.options.n_workers
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Runs `delayed` and whatever it depends on, blocking until done.
    pub fn compute<T: DeserializeOwned>(&self, delayed: &Delayed<T>) -> Result<T> {
        let report = self.run_targets(delayed.graph(), delayed.task_ids())?;
        let value = report.result_of(delayed.id(), delayed.key())?;

        serde_json::from_value(value)
            .with_context(|| format!("unexpected result type for task_id {}", delayed.id()))
    }

    /// Computes several handles of the same graph in a single run.
    pub fn compute_all<T: DeserializeOwned>(&self, delayed: &[Delayed<T>]) -> Result<Vec<T>> {
        let Some(first) = delayed.first() else {
            return Ok(vec![]);
        };
        if delayed.iter().any(|d| !d.graph().is_same(first.graph())) {
            bail!("all handles must belong to the same graph");
        }

        let targets: BTreeSet<usize> = delayed.iter().map(|d| d.id()).collect();
        let report = self.run_targets(first.graph(), &targets)?;

        delayed
            .iter()
            .map(|d| {
                serde_json::from_value(report.result_of(d.id(), d.key())?)
                    .with_context(|| format!("unexpected result type for task_id {}", d.id()))
            })
            .collect()
    }

    /// Runs every task of `graph`.
    pub fn run(&self, graph: &Graph) -> Result<RunReport> {
        self.execute(graph, None)
    }

    /// Runs `targets` and their upstream tasks; the rest is skipped.
    pub fn run_targets(&self, graph: &Graph, targets: &BTreeSet<usize>) -> Result<RunReport> {
        let targets: Vec<usize> = targets.iter().copied().collect();
        self.execute(graph, Some(&targets))
    }

    fn execute(&self, graph: &Graph, targets: Option<&[usize]>) -> Result<RunReport> {
        let tasks = graph.tasks();
        let edges = graph.edges();

        if let Some(target) = targets.into_iter().flatten().find(|t| **t >= tasks.len()) {
            bail!("task_id {target} does not exist in graph '{}'", graph.name());
        }
        if let Some(cycle) = describe_circular_dependencies(&tasks, &edges) {
            bail!("cycle detected: {cycle}");
        }

        let mut backend =
            InMemoryBackend::new(graph.name(), &tasks, &edges, graph.functions());
        let run = backend.create_new_run(Utc::now())?;
        backend.enqueue_run(&run, targets)?;
        debug!(
            "queued {} root task(s) of '{}'",
            backend.get_queue_length()?,
            run.name
        );

        run_in_memory(&mut backend, self.options.n_workers)?;

        let status = backend.get_run_status(run.run_id)?;
        let mut statuses = HashMap::new();
        let mut results = HashMap::new();
        for task in &tasks {
            statuses.insert(task.id, backend.get_task_status(run.run_id, task.id)?);
            if let Some(result) = backend.get_task_result(run.run_id, task.id)? {
                results.insert(task.id, result);
            }
        }

        info!("run of '{}' finished: {:?}", run.name, status);
        Ok(RunReport {
            run,
            status,
            tasks,
            edges,
            statuses,
            results,
        })
    }
}

/// Outcome of one execution of a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: Run,
    pub status: RunStatus,
    pub tasks: Vec<Task>,
    pub edges: HashSet<(usize, usize)>,
    pub statuses: HashMap<usize, TaskStatus>,
    pub results: HashMap<usize, TaskResult>,
}

impl RunReport {
    /// The successful result of `task_id`, optionally narrowed to one field.
    pub fn result_of(&self, task_id: usize, key: Option<&str>) -> Result<Value> {
        let result = self
            .results
            .get(&task_id)
            .ok_or_else(|| anyhow!("task_id {task_id} did not run"))?;

        if !result.success {
            bail!(
                "task {}_{} failed: {}",
                result.name,
                result.task_id,
                result.error_str
            );
        }

        match key {
            None => Ok(result.result.clone()),
            Some(key) => result
                .result
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow!("task_id {task_id} result does not contain key {key}")),
        }
    }

    /// Renders the graph coloured by the status each task ended in.
    pub fn visualize(&self, format: GraphFormat) -> String {
        render_graph(
            &self.tasks,
            &self.edges,
            &self.statuses,
            format,
            &self.run.name,
        )
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use serde_json::json;

    use super::*;

    fn slow_inc(x: i64) -> i64 {
        thread::sleep(Duration::from_millis(50));
        x + 1
    }

    fn add((x, y): (i64, i64)) -> i64 {
        x + y
    }

    fn stats(xs: Vec<i64>) -> Value {
        json!({"min": xs.iter().min(), "max": xs.iter().max()})
    }

    fn divide((x, y): (i64, i64)) -> i64 {
        x / y
    }

    fn client() -> Client {
        Client::new(ClientOptions {
            n_workers: 4,
            processes: false,
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_options() {
        assert!(Client::new(ClientOptions {
            n_workers: 0,
            processes: false
        })
        .is_err());
        assert!(Client::new(ClientOptions {
            n_workers: 4,
            processes: true
        })
        .is_err());
    }

    #[test]
    fn test_compute_chain() {
        let graph = Graph::new("chain");
        let x = graph.delayed(slow_inc, 1).unwrap();
        let y = graph.delayed(slow_inc, 2).unwrap();
        let z = graph.delayed(add, (&x, &y)).unwrap();

        assert_eq!(client().compute(&z).unwrap(), 5);
        assert_eq!(z.compute(&client()).unwrap(), 5);
        assert_eq!(client().compute(&x).unwrap(), 2);
    }

    #[test]
    fn test_compute_only_runs_ancestors() {
        let graph = Graph::new("partial");
        let x = graph.delayed(slow_inc, 1).unwrap();
        let y = graph.delayed(slow_inc, 10).unwrap();
        let _z = graph.delayed(add, (&x, &y)).unwrap();

        let report = client().run_targets(&graph, x.task_ids()).unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.count(TaskStatus::Success), 1);
        assert_eq!(report.count(TaskStatus::Skipped), 2);
    }

    #[test]
    fn test_compute_all_and_keys() {
        let graph = Graph::new("keys");
        let x = graph.delayed(slow_inc, 1).unwrap();
        let y = graph.delayed(slow_inc, 5).unwrap();
        let s = graph.delayed(stats, vec![&x, &y]).unwrap();
        let min: Delayed<i64> = s.get("min");
        let max: Delayed<i64> = s.get("max");

        assert_eq!(client().compute_all(&[min, max]).unwrap(), vec![2, 6]);
    }

    #[test]
    fn test_failed_task_is_an_error() {
        let graph = Graph::new("failing");
        let z = graph.delayed(divide, (1, 0)).unwrap();
        let w = graph.delayed(slow_inc, &z).unwrap();

        let err = client().compute(&z).unwrap_err();
        assert!(err.to_string().starts_with("task divide_0 failed: panicked"));

        let err = client().compute(&w).unwrap_err();
        assert!(err.to_string().contains("upstream task_id 0 failed!"));

        let report = client().run(&graph).unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report
            .visualize(GraphFormat::Mermaid)
            .contains("style id0 color:black,stroke:red"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let graph = Graph::new("cycle");
        let a = graph.delayed(slow_inc, 1).unwrap();
        let b = graph.delayed(slow_inc, &a).unwrap();
        let _ = &b >> &a;

        let err = client().compute(&b).unwrap_err();
        assert!(err.to_string().starts_with("cycle detected"));
    }
}
