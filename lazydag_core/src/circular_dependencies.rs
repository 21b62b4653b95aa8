use std::collections::HashSet;

use lazydag_task::Task;

/// Describes the first dependency cycle found, e.g. `(a_0)-->(b_1)-->(a_0)`.
pub fn describe_circular_dependencies(
    tasks: &[Task],
    edges: &HashSet<(usize, usize)>,
) -> Option<String> {
    let cycle_tasks = get_circular_dependencies(tasks, edges)?;
    Some(
        cycle_tasks
            .iter()
            .map(|i| match tasks.iter().find(|t| t.id == *i) {
                Some(task) => format!("({}_{})", task.name, i),
                None => format!("({i})"),
            })
            .collect::<Vec<String>>()
            .join("-->"),
    )
}

pub fn get_circular_dependencies(
    tasks: &[Task],
    edges: &HashSet<(usize, usize)>,
) -> Option<Vec<usize>> {
    let mut finished: HashSet<usize> = HashSet::new();

    for task in tasks {
        let mut cycle_tasks = vec![];

        if let Some(cycle) =
            _get_circular_dependencies(edges, task.id, &mut finished, &mut cycle_tasks)
        {
            return Some(cycle);
        }
    }
    None
}

fn get_upstream(id: usize, edges: &HashSet<(usize, usize)>) -> Vec<usize> {
    let mut upstream: Vec<usize> = edges.iter().filter(|e| e.1 == id).map(|e| e.0).collect();
    upstream.sort();
    upstream
}

fn _get_circular_dependencies(
    edges: &HashSet<(usize, usize)>,
    current: usize,
    finished: &mut HashSet<usize>,
    cycle_tasks: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    if finished.contains(&current) {
        return None;
    }
    if let Some(pos) = cycle_tasks.iter().position(|t| *t == current) {
        let mut cycle = cycle_tasks[pos..].to_vec();
        cycle.push(current);
        return Some(cycle);
    }

    cycle_tasks.push(current);
    for neighbor in get_upstream(current, edges) {
        if let Some(cycle) = _get_circular_dependencies(edges, neighbor, finished, cycle_tasks) {
            return Some(cycle);
        }
    }
    cycle_tasks.pop();
    finished.insert(current);
    None
}

#[cfg(test)]
mod tests {
    use lazydag_task::task_options::TaskOptions;
    use serde_json::Value;

    use super::*;

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|id| Task {
                id,
                name: "t".into(),
                function: "t".into(),
                template_args: Value::Null,
                options: TaskOptions::default(),
            })
            .collect()
    }

    #[test]
    fn test_no_cycle_in_diamond() {
        let edges = HashSet::from([(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert!(get_circular_dependencies(&tasks(4), &edges).is_none());
    }

    #[test]
    fn test_detects_cycle() {
        let edges = HashSet::from([(0, 1), (1, 2), (2, 1)]);
        let cycle = get_circular_dependencies(&tasks(3), &edges).unwrap();

        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&1) && cycle.contains(&2));
        assert!(!cycle.contains(&0));
    }

    #[test]
    fn test_describe_cycle() {
        let edges = HashSet::from([(0, 0)]);
        assert_eq!(
            describe_circular_dependencies(&tasks(1), &edges).unwrap(),
            "(t_0)-->(t_0)"
        );
    }
}
