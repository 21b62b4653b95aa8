use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{anyhow, bail, Result};
use lazydag_task::{
    queued_task::QueuedTask, task_result::TaskResult, task_status::TaskStatus, Task,
};
use lazydag_utils::{UPSTREAM_TASK_ID_KEY, UPSTREAM_TASK_RESULT_KEY};
use log::{debug, info};
use serde_json::{Map, Value};

use crate::{
    run::{Run, RunStatus},
    Backend,
};

pub trait BlanketBackend {
    fn get_run_status(&mut self, run_id: usize) -> Result<RunStatus>;

    fn is_task_done(&mut self, run_id: usize, task_id: usize) -> Result<bool>;
    fn task_needs_running(&mut self, run_id: usize, task_id: usize) -> Result<bool>;
    fn upstream_done(&mut self, run_id: usize, task_id: usize) -> Result<bool>;

    /// Materializes the default tasks into `run` and queues the roots.
    ///
    /// With `targets`, only the targets and their ancestors run; every other
    /// task is marked `Skipped`.
    fn enqueue_run(&mut self, run: &Run, targets: Option<&[usize]>) -> Result<()>;
    fn work(&mut self, queued_task: &QueuedTask) -> Result<()>;
    fn update_referenced_dependencies(&mut self, run_id: usize, downstream_id: usize)
        -> Result<()>;
    fn resolve_args(
        &mut self,
        run_id: usize,
        template_args: &Value,
        upstream_deps: &BTreeSet<usize>,
    ) -> Result<Value>;
    fn get_ancestors(&mut self, run_id: usize, targets: &[usize]) -> Result<HashSet<usize>>;

    fn handle_task_result(
        &mut self,
        run_id: usize,
        queued_task: &QueuedTask,
        result: TaskResult,
    ) -> Result<()>;
}

impl<U: Backend + Send + Sync> BlanketBackend for U {
    fn get_run_status(&mut self, run_id: usize) -> Result<RunStatus> {
        let mut pending_count = 0;
        let mut active_count = 0;
        let tasks = self.get_all_tasks(run_id)?;

        for task in &tasks {
            match self.get_task_status(run_id, task.id)? {
                TaskStatus::Failure => return Ok(RunStatus::Failed),
                TaskStatus::Pending => {
                    pending_count += 1;
                    active_count += 1;
                }
                TaskStatus::Running | TaskStatus::RetryPending => active_count += 1,
                TaskStatus::Success | TaskStatus::Skipped => {}
            };
        }
        if active_count == 0 {
            Ok(RunStatus::Success)
        } else if pending_count == tasks.len() {
            Ok(RunStatus::Pending)
        } else {
            Ok(RunStatus::Running)
        }
    }

    fn is_task_done(&mut self, run_id: usize, task_id: usize) -> Result<bool> {
        Ok(self.get_task_status(run_id, task_id)?.is_done())
    }

    fn task_needs_running(&mut self, run_id: usize, task_id: usize) -> Result<bool> {
        Ok(matches!(
            self.get_task_status(run_id, task_id)?,
            TaskStatus::Pending | TaskStatus::RetryPending
        ))
    }

    fn upstream_done(&mut self, run_id: usize, task_id: usize) -> Result<bool> {
        for upstream_id in self.get_upstream(run_id, task_id)? {
            if !self.is_task_done(run_id, upstream_id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn enqueue_run(&mut self, run: &Run, targets: Option<&[usize]>) -> Result<()> {
        let default_tasks = self.get_default_tasks()?;

        for task in &default_tasks {
            let new_id = self.append_task(run.run_id, task)?;
            if new_id != task.id {
                bail!("task {} was stored as {new_id}", task.id);
            }
            self.update_referenced_dependencies(run.run_id, task.id)?;
        }

        for edge in self.get_default_edges()? {
            self.insert_edge(run.run_id, edge)?;
        }

        if let Some(targets) = targets {
            let needed = self.get_ancestors(run.run_id, targets)?;
            for task in &default_tasks {
                if !needed.contains(&task.id) {
                    self.set_task_status(run.run_id, task.id, TaskStatus::Skipped)?;
                }
            }
            debug!(
                "run {} needs {} of {} tasks",
                run.run_id,
                needed.len(),
                default_tasks.len()
            );
        }

        // only enqueue tasks with no upstream dependencies
        for task in default_tasks {
            if self.task_needs_running(run.run_id, task.id)?
                && self.get_task_depth(run.run_id, task.id)? == 0
            {
                self.enqueue_task(run.run_id, task.id, 1)?;
            }
        }

        Ok(())
    }

    fn get_ancestors(&mut self, run_id: usize, targets: &[usize]) -> Result<HashSet<usize>> {
        let mut needed: HashSet<usize> = HashSet::new();
        let mut to_visit: Vec<usize> = targets.to_vec();

        while let Some(curr) = to_visit.pop() {
            if needed.insert(curr) {
                to_visit.append(&mut self.get_upstream(run_id, curr)?);
            }
        }
        Ok(needed)
    }

    fn handle_task_result(
        &mut self,
        run_id: usize,
        queued_task: &QueuedTask,
        result: TaskResult,
    ) -> Result<()> {
        self.insert_task_results(run_id, &result)?;
        result.log_task_result();

        if result.needs_retry() {
            info!(
                "attempt failed, retrying {}/{}",
                result.attempt + 1,
                result.max_attempts
            );
            self.set_task_status(run_id, result.task_id, TaskStatus::RetryPending)?;
            self.enqueue_task(run_id, result.task_id, queued_task.attempt + 1)?;
            return Ok(());
        }

        self.set_task_status(
            run_id,
            result.task_id,
            if result.success {
                TaskStatus::Success
            } else {
                TaskStatus::Failure
            },
        )?;

        for downstream in self.get_downstream(run_id, result.task_id)? {
            if self.task_needs_running(run_id, downstream)?
                && self.upstream_done(run_id, downstream)?
            {
                self.enqueue_task(run_id, downstream, 1)?;
            }
        }
        Ok(())
    }

    fn resolve_args(
        &mut self,
        run_id: usize,
        template_args: &Value,
        upstream_deps: &BTreeSet<usize>,
    ) -> Result<Value> {
        let mut results: HashMap<usize, Value> = HashMap::new();
        for upstream_id in upstream_deps {
            let task_result = self
                .get_task_result(run_id, *upstream_id)?
                .ok_or_else(|| anyhow!("upstream task_id {} has no result!", upstream_id))?;

            if !task_result.success {
                bail!("upstream task_id {} failed!", upstream_id);
            }
            results.insert(*upstream_id, task_result.result);
        }

        substitute_upstream_results(template_args, &results)
    }

    fn work(&mut self, queued_task: &QueuedTask) -> Result<()> {
        let run_id = queued_task.run_id;
        let task = self.get_task_by_id(run_id, queued_task.task_id)?;
        self.set_task_status(run_id, task.id, TaskStatus::Running)?;

        let dependencies = self.get_dependencies(run_id, task.id)?;
        let prepared = self
            .resolve_args(run_id, &task.template_args, &dependencies)
            .and_then(|resolved| Ok((self.get_function(&task.function)?, resolved)));

        let result = match prepared {
            Ok((function, resolved_args)) => {
                task.execute(&function, &resolved_args, queued_task.attempt)
            }
            Err(err) => premature_error(&task, queued_task.attempt, err.to_string()),
        };

        self.handle_task_result(run_id, queued_task, result)
    }

    fn update_referenced_dependencies(
        &mut self,
        run_id: usize,
        downstream_id: usize,
    ) -> Result<()> {
        let template_args = self.get_template_args(run_id, downstream_id)?;
        let mut upstream_ids = BTreeSet::new();
        collect_upstream_ids(&template_args, &mut upstream_ids)?;

        for upstream_id in upstream_ids {
            self.set_dependency(run_id, downstream_id, upstream_id)?;
            self.insert_edge(run_id, (upstream_id, downstream_id))?;
        }
        Ok(())
    }
}

fn premature_error(task: &Task, attempt: usize, error_str: String) -> TaskResult {
    TaskResult::premature_error(
        task.id,
        attempt,
        task.options.max_attempts,
        task.name.clone(),
        task.function.clone(),
        error_str,
    )
}

fn as_upstream_reference(map: &Map<String, Value>) -> Result<Option<(usize, Option<&str>)>> {
    let Some(id) = map.get(UPSTREAM_TASK_ID_KEY) else {
        return Ok(None);
    };
    let upstream_id = id
        .as_u64()
        .ok_or_else(|| anyhow!("invalid {UPSTREAM_TASK_ID_KEY} '{id}'"))? as usize;
    let key = match map.get(UPSTREAM_TASK_RESULT_KEY) {
        Some(key) => Some(
            key.as_str()
                .ok_or_else(|| anyhow!("invalid {UPSTREAM_TASK_RESULT_KEY} '{key}'"))?,
        ),
        None => None,
    };
    Ok(Some((upstream_id, key)))
}

pub fn collect_upstream_ids(value: &Value, upstream_ids: &mut BTreeSet<usize>) -> Result<()> {
    match value {
        Value::Array(values) => {
            for v in values {
                collect_upstream_ids(v, upstream_ids)?;
            }
        }
        Value::Object(map) => match as_upstream_reference(map)? {
            Some((upstream_id, _)) => {
                upstream_ids.insert(upstream_id);
            }
            None => {
                for v in map.values() {
                    collect_upstream_ids(v, upstream_ids)?;
                }
            }
        },
        _ => {}
    }
    Ok(())
}

fn substitute_upstream_results(value: &Value, results: &HashMap<usize, Value>) -> Result<Value> {
    match value {
        Value::Array(values) => Ok(Value::Array(
            values
                .iter()
                .map(|v| substitute_upstream_results(v, results))
                .collect::<Result<Vec<Value>>>()?,
        )),
        Value::Object(map) => match as_upstream_reference(map)? {
            Some((upstream_id, key)) => {
                let result = results
                    .get(&upstream_id)
                    .ok_or_else(|| anyhow!("upstream task_id {} is not a dependency", upstream_id))?;

                let Some(key) = key else {
                    return Ok(result.clone());
                };
                let Some(upstream_results_map) = result.as_object() else {
                    bail!(
                        "upstream_task_id {} result type '{:?}' is not a map",
                        upstream_id,
                        result
                    );
                };
                upstream_results_map.get(key).cloned().ok_or_else(|| {
                    anyhow!(
                        "upstream task_id {} result does not contain key {}",
                        upstream_id,
                        key
                    )
                })
            }
            None => Ok(Value::Object(
                map.iter()
                    .map(|(k, v)| -> Result<(String, Value)> {
                        Ok((k.clone(), substitute_upstream_results(v, results)?))
                    })
                    .collect::<Result<Map<String, Value>>>()?,
            )),
        },
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_collect_upstream_ids_nested() {
        let args = json!([
            {"upstream_task_id": 0},
            {"inner": {"upstream_task_id": 2, "key": "total"}},
            3,
        ]);
        let mut ids = BTreeSet::new();
        collect_upstream_ids(&args, &mut ids).unwrap();
        assert_eq!(ids, BTreeSet::from([0, 2]));
    }

    #[test]
    fn test_substitute_array_and_key() {
        let results = HashMap::from([(0, json!(2)), (1, json!({"total": 3}))]);
        let args = json!([{"upstream_task_id": 0}, {"upstream_task_id": 1, "key": "total"}]);

        assert_eq!(
            substitute_upstream_results(&args, &results).unwrap(),
            json!([2, 3])
        );
    }

    #[test]
    fn test_substitute_whole_argument() {
        let results = HashMap::from([(4, json!("abc"))]);
        let args = json!({"upstream_task_id": 4});

        assert_eq!(
            substitute_upstream_results(&args, &results).unwrap(),
            json!("abc")
        );
    }

    #[test]
    fn test_substitute_missing_key_fails() {
        let results = HashMap::from([(0, json!({"a": 1}))]);
        let args = json!({"upstream_task_id": 0, "key": "b"});

        let err = substitute_upstream_results(&args, &results).unwrap_err();
        assert!(err.to_string().contains("does not contain key b"));
    }

    #[test]
    fn test_substitute_key_on_scalar_fails() {
        let results = HashMap::from([(0, json!(1))]);
        let args = json!({"upstream_task_id": 0, "key": "b"});

        assert!(substitute_upstream_results(&args, &results).is_err());
    }
}
