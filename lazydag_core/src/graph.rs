use std::{
    any::TypeId,
    cell::Cell,
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use lazydag_runner::blanket_backend::collect_upstream_ids;
use lazydag_task::{
    delayed_inner::DelayedInner, task_options::TaskOptions, Task, TaskFunction,
};
use lazydag_utils::function_name_as_string;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    delayed::Delayed,
    visualize::{render_graph, GraphFormat},
};

static NEXT_GRAPH_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    // graph whose task arguments are being serialized on this thread
    static ARGS_GRAPH_ID: Cell<Option<usize>> = Cell::new(None);
}

/// Id of the graph currently recording a task on this thread, if any.
pub(crate) fn args_graph_id() -> Option<usize> {
    ARGS_GRAPH_ID.with(|id| id.get())
}

#[derive(Default)]
struct GraphState {
    tasks: Vec<Task>,
    functions: HashMap<String, TaskFunction>,
    function_types: HashMap<String, TypeId>,
    edges: HashSet<(usize, usize)>,
}

/// A lazily built task graph.
///
/// Cloning is cheap and every clone (as well as every [`Delayed`] handle
/// created from it) refers to the same graph. Nothing is executed until a
/// [`Client`](crate::client::Client) computes a handle.
#[derive(Clone)]
pub struct Graph {
    id: usize,
    name: Arc<str>,
    state: Arc<RwLock<GraphState>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("graph")
    }
}

impl Graph {
    pub fn new(name: &str) -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            state: Arc::default(),
        }
    }

    /// Process-unique id, shared by all clones.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records a deferred call `function(args)` and returns a handle to its
    /// future result.
    ///
    /// `args` may contain other [`Delayed`] handles anywhere inside it; they
    /// are replaced with the corresponding results before `function` runs.
    pub fn delayed<F, A, T, G>(&self, function: F, args: A) -> Result<Delayed<G>>
    where
        F: Fn(T) -> G + 'static + Sync + Send,
        A: Serialize,
        T: DeserializeOwned + 'static,
        G: Serialize + 'static,
    {
        self.delayed_with_options(function, args, &TaskOptions::default())
    }

    pub fn delayed_with_options<F, A, T, G>(
        &self,
        function: F,
        args: A,
        options: &TaskOptions,
    ) -> Result<Delayed<G>>
    where
        F: Fn(T) -> G + 'static + Sync + Send,
        A: Serialize,
        T: DeserializeOwned + 'static,
        G: Serialize + 'static,
    {
        let template_args = self.serialize_args(args)?;
        let mut upstream_ids = BTreeSet::new();
        collect_upstream_ids(&template_args, &mut upstream_ids)?;

        let mut state = self.state.write();
        let function_name = register_function(&mut state, function);

        let id = state.tasks.len();
        if let Some(unknown) = upstream_ids.iter().find(|u| **u >= id) {
            anyhow::bail!("argument refers to unknown task_id {unknown}");
        }

        state.tasks.push(Task {
            id,
            name: function_name.clone(),
            function: function_name,
            template_args,
            options: *options,
        });
        for upstream_id in upstream_ids {
            state.edges.insert((upstream_id, id));
        }

        Ok(Delayed::new(DelayedInner::new(id), self.clone()))
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.read().tasks.clone()
    }

    pub fn edges(&self) -> HashSet<(usize, usize)> {
        self.state.read().edges.clone()
    }

    pub fn functions(&self) -> HashMap<String, TaskFunction> {
        self.state.read().functions.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_same(&self, other: &Graph) -> bool {
        self.id == other.id
    }

    /// Handles of other graphs refuse to serialize while this runs.
    fn serialize_args<A: Serialize>(&self, args: A) -> Result<Value> {
        let previous = ARGS_GRAPH_ID.with(|id| id.replace(Some(self.id)));
        let template_args = serde_json::to_value(args);
        ARGS_GRAPH_ID.with(|id| id.set(previous));

        template_args.context("arguments are not serializable")
    }

    pub(crate) fn add_edge(&self, upstream_id: usize, downstream_id: usize) {
        self.state.write().edges.insert((upstream_id, downstream_id));
    }

    /// Renders only `targets` and everything upstream of them.
    pub fn visualize_targets(&self, targets: &BTreeSet<usize>, format: GraphFormat) -> String {
        let state = self.state.read();
        let needed = ancestors(&state.edges, targets);
        let tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| needed.contains(&t.id))
            .cloned()
            .collect();
        let edges: HashSet<(usize, usize)> = state
            .edges
            .iter()
            .filter(|(u, d)| needed.contains(u) && needed.contains(d))
            .copied()
            .collect();

        render_graph(&tasks, &edges, &HashMap::new(), format, self.name())
    }
}

pub(crate) fn ancestors(
    edges: &HashSet<(usize, usize)>,
    targets: &BTreeSet<usize>,
) -> HashSet<usize> {
    let mut needed = HashSet::new();
    let mut to_visit: Vec<usize> = targets.iter().copied().collect();

    while let Some(curr) = to_visit.pop() {
        if needed.insert(curr) {
            to_visit.extend(edges.iter().filter(|(_, d)| *d == curr).map(|(u, _)| *u));
        }
    }
    needed
}

fn register_function<F, T, G>(state: &mut GraphState, function: F) -> String
where
    F: Fn(T) -> G + 'static + Sync + Send,
    T: DeserializeOwned + 'static,
    G: Serialize + 'static,
{
    let base_name = function_name_as_string(&function);
    let type_id = TypeId::of::<F>();

    // distinct closures share a type name, so disambiguate by type
    let mut function_name = base_name.clone();
    let mut suffix = 1;
    while let Some(existing) = state.function_types.get(&function_name) {
        if *existing == type_id {
            return function_name;
        }
        function_name = format!("{base_name}_{suffix}");
        suffix += 1;
    }

    state.function_types.insert(function_name.clone(), type_id);
    state
        .functions
        .insert(function_name.clone(), wrap_function(function));
    function_name
}

pub fn wrap_function<K, T, F>(function: F) -> TaskFunction
where
    T: Serialize,
    K: DeserializeOwned,
    F: Fn(K) -> T + 'static + Sync + Send,
{
    Arc::new(move |value: Value| -> Result<Value> {
        let input: K = serde_json::from_value(value).context("invalid arguments")?;
        let output: T = function(input);
        Ok(serde_json::to_value(output)?)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn double(x: i64) -> i64 {
        x * 2
    }

    fn sum(xs: Vec<i64>) -> i64 {
        xs.iter().sum()
    }

    #[test]
    fn test_delayed_records_without_running() {
        let graph = Graph::new("test");
        let a = graph.delayed(double, 1).unwrap();
        let b = graph.delayed(double, 2).unwrap();
        let c = graph.delayed(sum, (&a, &b)).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(c.id(), 2);
        assert_eq!(graph.edges(), HashSet::from([(0, 2), (1, 2)]));

        let tasks = graph.tasks();
        assert_eq!(tasks[0].name, "double");
        assert_eq!(
            tasks[2].template_args,
            json!([{"upstream_task_id": 0}, {"upstream_task_id": 1}])
        );
    }

    #[test]
    fn test_same_function_registered_once() {
        let graph = Graph::new("test");
        graph.delayed(double, 1).unwrap();
        graph.delayed(double, 2).unwrap();

        assert_eq!(graph.functions().len(), 1);
    }

    #[test]
    fn test_closures_get_distinct_names() {
        let graph = Graph::new("test");
        let a = graph.delayed(|x: i64| x + 1, 1).unwrap();
        let b = graph.delayed(|x: i64| x - 1, 1).unwrap();

        let tasks = graph.tasks();
        assert_ne!(tasks[a.id()].function, tasks[b.id()].function);
        assert_eq!(graph.functions().len(), 2);
    }

    #[test]
    fn test_wrapped_function_rejects_bad_arguments() {
        let function = wrap_function(double);
        assert_eq!(function(json!(4)).unwrap(), json!(8));
        assert!(function(json!("four")).is_err());
    }

    #[test]
    fn test_handle_from_other_graph_is_rejected() {
        let other = Graph::new("other");
        let _ = other.delayed(double, 1).unwrap();
        let foreign = other.delayed(double, 1000).unwrap();

        let graph = Graph::new("test");
        let a = graph.delayed(double, 1).unwrap();
        let _ = graph.delayed(double, 2).unwrap();

        let err = graph.delayed(sum, (&a, &foreign)).unwrap_err();
        assert!(format!("{err:#}").contains("belongs to graph 'other'"));
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edges(), HashSet::new());

        // handles still serialize outside of a delayed call
        assert_eq!(
            serde_json::to_value(&foreign).unwrap(),
            json!({"upstream_task_id": 1})
        );
    }

    #[test]
    fn test_visualize_tree_with_cycle() {
        let graph = Graph::new("loop");
        let a = graph.delayed(double, 1).unwrap();
        let b = graph.delayed(double, &a).unwrap();
        let c = graph.delayed(double, &b).unwrap();
        let _ = &c >> &b;

        let out = c.visualize(GraphFormat::Tree);
        assert!(out.contains("double_1 (cycle)"));
    }

    #[test]
    fn test_clones_share_id() {
        let graph = Graph::new("test");
        assert!(graph.is_same(&graph.clone()));
        assert!(!graph.is_same(&Graph::new("test")));
    }

    #[test]
    fn test_ancestors() {
        let edges = HashSet::from([(0, 2), (1, 2), (2, 3), (4, 3)]);
        assert_eq!(
            ancestors(&edges, &BTreeSet::from([2])),
            HashSet::from([0, 1, 2])
        );
    }
}
