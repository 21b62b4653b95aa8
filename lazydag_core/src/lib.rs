//! # lazydag
//!
//! `lazydag` turns ordinary Rust functions into deferred calls. Each call made
//! through [`Graph::delayed`](graph::Graph::delayed) only records a task and
//! returns a [`Delayed`](delayed::Delayed) handle; handles passed as arguments
//! to other delayed calls form a [Directed Acyclic Graph](https://en.wikipedia.org/wiki/Directed_acyclic_graph).
//! A [`Client`](client::Client) then executes the tasks a handle needs on a
//! pool of local worker threads, and the graph can be rendered as Mermaid,
//! Graphviz DOT or a plain text tree.
pub mod circular_dependencies;
pub mod client;
pub mod delayed;
pub mod flow;
pub mod graph;
pub mod visualize;

pub mod prelude {
    pub use crate::client::{Client, ClientOptions, RunReport};
    pub use crate::delayed::Delayed;
    pub use crate::flow::{par, seq};
    pub use crate::graph::Graph;
    pub use crate::visualize::GraphFormat;

    pub use lazydag_runner::run::RunStatus;
    pub use lazydag_task::task_options::TaskOptions;
    pub use lazydag_task::task_status::TaskStatus;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
}
