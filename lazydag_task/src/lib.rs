use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use anyhow::Result;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use task_options::TaskOptions;
use task_result::TaskResult;

pub mod delayed_inner;
pub mod ordered_queued_task;
pub mod queued_task;
pub mod task_options;
pub mod task_result;
pub mod task_status;

/// A registered function, erased to JSON in and JSON out.
pub type TaskFunction = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Task {
    pub id: usize,
    pub name: String,
    pub function: String,
    pub template_args: Value,
    pub options: TaskOptions,
}

impl Task {
    /// Runs `function` on the current thread with already resolved arguments.
    ///
    /// Errors returned by the function and panics inside it both end up as a
    /// failed [`TaskResult`]; this never fails itself.
    pub fn execute(
        &self,
        function: &TaskFunction,
        resolved_args: &Value,
        attempt: usize,
    ) -> TaskResult {
        let resolved_args_str = resolved_args.to_string();

        if attempt > 1 {
            thread::sleep(self.options.retry_delay);
        }
        debug!(
            "running {}_{} attempt {} with {}",
            self.name, self.id, attempt, resolved_args_str
        );

        let start = Utc::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| function(resolved_args.clone())));
        let end = Utc::now();

        let (success, result, error_str) = match outcome {
            Ok(Ok(value)) => (true, value, String::new()),
            Ok(Err(err)) => (false, Value::Null, format!("{err:#}")),
            Err(payload) => (false, Value::Null, panic_message(payload.as_ref())),
        };

        TaskResult {
            task_id: self.id,
            result,
            attempt,
            max_attempts: self.options.max_attempts,
            name: self.name.clone(),
            function: self.function.clone(),
            success,
            resolved_args_str,
            started: Some(start),
            ended: Some(end),
            elapsed_ms: (end - start).num_milliseconds(),
            premature_failure: false,
            error_str,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use serde_json::json;

    use super::*;

    fn task() -> Task {
        Task {
            id: 0,
            name: "inc".into(),
            function: "inc".into(),
            template_args: json!(1),
            options: TaskOptions::default(),
        }
    }

    #[test]
    fn test_execute_success() {
        let function: TaskFunction = Arc::new(|v: Value| Ok(json!(v.as_i64().unwrap() + 1)));
        let result = task().execute(&function, &json!(1), 1);

        assert!(result.success);
        assert_eq!(result.result, json!(2));
        assert_eq!(result.resolved_args_str, "1");
        assert!(result.started.is_some() && result.ended.is_some());
    }

    #[test]
    fn test_execute_error() {
        let function: TaskFunction = Arc::new(|_| Err(anyhow!("bad input")));
        let result = task().execute(&function, &json!(1), 1);

        assert!(!result.success);
        assert!(!result.premature_failure);
        assert_eq!(result.error_str, "bad input");
    }

    #[test]
    fn test_execute_panic() {
        let function: TaskFunction = Arc::new(|_| panic!("kaboom"));
        let result = task().execute(&function, &json!(1), 1);

        assert!(!result.success);
        assert_eq!(result.error_str, "panicked: kaboom");
    }
}
