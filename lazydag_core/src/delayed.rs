use std::{collections::BTreeSet, fmt, marker::PhantomData};

use anyhow::Result;
use lazydag_task::delayed_inner::DelayedInner;
use serde::{de::DeserializeOwned, ser::Error, Serialize, Serializer};

use crate::{
    client::Client,
    graph::{args_graph_id, Graph},
    visualize::GraphFormat,
};

/// Handle to the not yet computed result of a delayed call.
///
/// Handles can be passed (by reference, inside tuples, vectors or structs)
/// as arguments to further delayed calls, which makes those calls depend on
/// this one.
pub struct Delayed<T> {
    pub(crate) inner: DelayedInner<T>,
    pub(crate) graph: Graph,
}

impl<T> Delayed<T> {
    pub(crate) fn new(inner: DelayedInner<T>, graph: Graph) -> Self {
        Self { inner, graph }
    }

    /// Id of the task whose result this handle stands for.
    pub fn id(&self) -> usize {
        *self
            .inner
            .task_ids
            .iter()
            .next_back()
            .expect("delayed handles always refer to at least one task")
    }

    pub fn task_ids(&self) -> &BTreeSet<usize> {
        &self.inner.task_ids
    }

    pub fn key(&self) -> Option<&str> {
        self.inner.key.as_deref()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Selects one field of an object result.
    pub fn get<G>(&self, key: &str) -> Delayed<G> {
        Delayed {
            inner: DelayedInner {
                task_ids: BTreeSet::from([self.id()]),
                key: Some(key.to_string()),
                _marker: PhantomData,
            },
            graph: self.graph.clone(),
        }
    }

    /// Renders this handle's task and everything it depends on.
    pub fn visualize(&self, format: GraphFormat) -> String {
        self.graph
            .visualize_targets(&BTreeSet::from([self.id()]), format)
    }

    /// Same as [`Client::compute`] on this handle.
    pub fn compute(&self, client: &Client) -> Result<T>
    where
        T: DeserializeOwned,
    {
        client.compute(self)
    }
}

impl<T> Clone for Delayed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            graph: self.graph.clone(),
        }
    }
}

impl<T> fmt::Debug for Delayed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delayed")
            .field("graph", &self.graph.name())
            .field("task_ids", &self.inner.task_ids)
            .field("key", &self.inner.key)
            .finish()
    }
}

impl<T> Serialize for Delayed<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if let Some(graph_id) = args_graph_id() {
            if graph_id != self.graph.id() {
                return Err(S::Error::custom(format!(
                    "task_id {} belongs to graph '{}' and can't be used as an argument of another graph",
                    self.id(),
                    self.graph.name()
                )));
            }
        }
        self.inner.serialize(serializer)
    }
}
