use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskResult {
    pub task_id: usize,
    pub result: Value,
    pub attempt: usize,
    pub max_attempts: usize,
    pub name: String,
    pub function: String,
    pub success: bool,
    pub resolved_args_str: String,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub elapsed_ms: i64,
    pub premature_failure: bool,
    pub error_str: String,
}

impl TaskResult {
    pub fn needs_retry(&self) -> bool {
        !self.premature_failure && !self.success && self.attempt < self.max_attempts
    }

    /// Result for a task that never ran, e.g. because an upstream failed.
    pub fn premature_error(
        task_id: usize,
        attempt: usize,
        max_attempts: usize,
        name: String,
        function_name: String,
        error_str: String,
    ) -> Self {
        Self {
            task_id,
            result: Value::Null,
            attempt,
            max_attempts,
            name,
            function: function_name,
            success: false,
            resolved_args_str: "".into(),
            started: None,
            ended: None,
            elapsed_ms: 0,
            premature_failure: true,
            error_str,
        }
    }

    pub fn log_task_result(&self) {
        if self.success {
            info!(
                "task {}_{} succeeded (attempt {}/{}, {}ms): {} -> {}",
                self.name,
                self.task_id,
                self.attempt,
                self.max_attempts,
                self.elapsed_ms,
                self.resolved_args_str,
                self.result,
            );
        } else if self.premature_failure {
            warn!(
                "task {}_{} failed before running: {}",
                self.name, self.task_id, self.error_str
            );
        } else {
            warn!(
                "task {}_{} failed (attempt {}/{}): {}",
                self.name, self.task_id, self.attempt, self.max_attempts, self.error_str
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(attempt: usize, max_attempts: usize) -> TaskResult {
        TaskResult {
            task_id: 0,
            result: Value::Null,
            attempt,
            max_attempts,
            name: "inc".into(),
            function: "inc".into(),
            success: false,
            resolved_args_str: "1".into(),
            started: None,
            ended: None,
            elapsed_ms: 0,
            premature_failure: false,
            error_str: "boom".into(),
        }
    }

    #[test]
    fn test_needs_retry() {
        assert!(failed(1, 3).needs_retry());
        assert!(!failed(3, 3).needs_retry());
        assert!(!failed(1, 1).needs_retry());
    }

    #[test]
    fn test_premature_failure_never_retries() {
        let result = TaskResult::premature_error(
            1,
            1,
            5,
            "add".into(),
            "add".into(),
            "upstream task_id 0 failed!".into(),
        );
        assert!(!result.needs_retry());
        assert!(!result.success);
    }
}
