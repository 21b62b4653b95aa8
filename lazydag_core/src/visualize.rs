use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
};

use anyhow::bail;
use lazydag_task::{task_status::TaskStatus, Task};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    #[default]
    Mermaid,
    Dot,
    Tree,
}

impl GraphFormat {
    pub fn file_extension(&self) -> &'static str {
        match self {
            GraphFormat::Mermaid => "mmd",
            GraphFormat::Dot => "dot",
            GraphFormat::Tree => "txt",
        }
    }
}

impl FromStr for GraphFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mermaid" => Ok(GraphFormat::Mermaid),
            "dot" | "graphviz" => Ok(GraphFormat::Dot),
            "tree" => Ok(GraphFormat::Tree),
            other => bail!("unknown graph format '{other}'"),
        }
    }
}

impl fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphFormat::Mermaid => "mermaid",
            GraphFormat::Dot => "dot",
            GraphFormat::Tree => "tree",
        };
        f.write_str(name)
    }
}

/// Renders `tasks` and the `edges` between them. Tasks missing from
/// `task_statuses` are drawn as pending.
pub fn render_graph(
    tasks: &[Task],
    edges: &HashSet<(usize, usize)>,
    task_statuses: &HashMap<usize, TaskStatus>,
    format: GraphFormat,
    graph_name: &str,
) -> String {
    let nodes: Vec<(usize, String, TaskStatus)> = tasks
        .iter()
        .map(|t| {
            (
                t.id,
                t.name.clone(),
                task_statuses
                    .get(&t.id)
                    .copied()
                    .unwrap_or(TaskStatus::Pending),
            )
        })
        .collect();

    match format {
        GraphFormat::Mermaid => get_mermaid_graph(&nodes, &upstream_ids(tasks, edges)),
        GraphFormat::Dot => get_dot_graph(&nodes, edges, graph_name),
        GraphFormat::Tree => get_tree_graph(&nodes, &downstream_ids(tasks, edges), graph_name),
    }
}

fn upstream_ids(tasks: &[Task], edges: &HashSet<(usize, usize)>) -> HashMap<usize, Vec<usize>> {
    let mut upstream_ids: HashMap<usize, Vec<usize>> =
        HashMap::from_iter(tasks.iter().map(|t| (t.id, vec![])));
    for (upstream_id, downstream_id) in edges {
        if let Some(ids) = upstream_ids.get_mut(downstream_id) {
            ids.push(*upstream_id);
        }
    }
    for ids in upstream_ids.values_mut() {
        ids.sort();
    }
    upstream_ids
}

fn downstream_ids(tasks: &[Task], edges: &HashSet<(usize, usize)>) -> HashMap<usize, Vec<usize>> {
    let mut downstream_ids: HashMap<usize, Vec<usize>> =
        HashMap::from_iter(tasks.iter().map(|t| (t.id, vec![])));
    for (upstream_id, downstream_id) in edges {
        if let Some(ids) = downstream_ids.get_mut(upstream_id) {
            ids.push(*downstream_id);
        }
    }
    for ids in downstream_ids.values_mut() {
        ids.sort();
    }
    downstream_ids
}

pub fn get_mermaid_graph(
    nodes: &[(usize, String, TaskStatus)],
    upstream_ids: &HashMap<usize, Vec<usize>>,
) -> String {
    let mut out = "flowchart TD\n".to_string();

    for (task_id, task_name, task_status) in nodes {
        let styling = get_styling_for_status(task_status);
        out += &format!("  id{task_id}({task_name}_{task_id})\n");
        out += &format!("  style id{task_id} {styling}\n");

        for edge_id in upstream_ids.get(task_id).into_iter().flatten() {
            out += &format!("  id{edge_id}-->id{task_id}\n");
        }
    }

    out
}

pub fn get_dot_graph(
    nodes: &[(usize, String, TaskStatus)],
    edges: &HashSet<(usize, usize)>,
    graph_name: &str,
) -> String {
    let mut out = format!("digraph \"{}\" {{\n", graph_name.replace('"', "\\\""));
    out += "  rankdir=BT;\n";

    for (task_id, task_name, task_status) in nodes {
        out += &format!(
            "  id{task_id} [label=\"{task_name}_{task_id}\", shape=box, color=\"{}\"];\n",
            get_color_for_status(task_status)
        );
    }

    let mut sorted_edges: Vec<&(usize, usize)> = edges.iter().collect();
    sorted_edges.sort();
    for (upstream_id, downstream_id) in sorted_edges {
        out += &format!("  id{upstream_id} -> id{downstream_id};\n");
    }

    out += "}\n";
    out
}

pub fn get_tree_graph(
    nodes: &[(usize, String, TaskStatus)],
    downstream_ids: &HashMap<usize, Vec<usize>>,
    graph_name: &str,
) -> String {
    let names: HashMap<usize, &str> = nodes
        .iter()
        .map(|(id, name, _)| (*id, name.as_str()))
        .collect();
    let has_upstream: HashSet<usize> = downstream_ids.values().flatten().copied().collect();
    let roots: Vec<usize> = nodes
        .iter()
        .map(|(id, _, _)| *id)
        .filter(|id| !has_upstream.contains(id))
        .collect();

    let mut output = format!("{graph_name}\n");
    for (index, child) in roots.iter().enumerate() {
        let is_last = index == roots.len() - 1;
        let connector = if is_last { "└── " } else { "├── " };
        output.push_str(&get_tree(
            &names,
            downstream_ids,
            *child,
            connector,
            vec![is_last],
            &mut vec![],
        ));
    }
    output
}

fn get_tree(
    names: &HashMap<usize, &str>,
    downstream_ids: &HashMap<usize, Vec<usize>>,
    task_id: usize,
    prefix: &str,
    prev_is_last: Vec<bool>,
    path: &mut Vec<usize>,
) -> String {
    let label = format!(
        "{}_{}",
        names.get(&task_id).copied().unwrap_or("?"),
        task_id
    );
    // a task already on the path closes a cycle
    if path.contains(&task_id) {
        return format!("{prefix}{label} (cycle)\n");
    }

    let mut output = format!("{prefix}{label}\n");
    let children = downstream_ids.get(&task_id).cloned().unwrap_or_default();
    path.push(task_id);

    for (index, child) in children.iter().enumerate() {
        let is_last = index == children.len() - 1;
        let child_prefix = prev_is_last.iter().fold(String::new(), |acc, &last| {
            if last {
                acc + "    "
            } else {
                acc + "│   "
            }
        });

        let connector = if is_last { "└── " } else { "├── " };
        let mut new_prev_is_last = prev_is_last.clone();
        new_prev_is_last.push(is_last);
        output.push_str(&get_tree(
            names,
            downstream_ids,
            *child,
            &format!("{}{}", child_prefix, connector),
            new_prev_is_last,
            path,
        ));
    }

    path.pop();
    output
}

fn get_styling_for_status(task_status: &TaskStatus) -> String {
    format!(
        "color:black,stroke:{},fill:white,stroke-width:4px",
        get_color_for_status(task_status)
    )
}

fn get_color_for_status(task_status: &TaskStatus) -> &'static str {
    match task_status {
        TaskStatus::Pending => "grey",
        TaskStatus::Success => "green",
        TaskStatus::Failure => "red",
        TaskStatus::Running => "#90EE90",
        TaskStatus::RetryPending => "orange",
        TaskStatus::Skipped => "pink",
    }
}
