use lazydag_utils::{UPSTREAM_TASK_ID_KEY, UPSTREAM_TASK_RESULT_KEY};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::{collections::BTreeSet, marker::PhantomData};

/// Untyped part of a lazy handle: the task(s) it stands for and an optional
/// key selecting one field of an object result.
///
/// When a handle is passed as an argument to another delayed call it
/// serializes to `{"upstream_task_id": id}`, which the runner later replaces
/// with the upstream result.
#[derive(Debug)]
pub struct DelayedInner<T> {
    pub task_ids: BTreeSet<usize>,
    pub key: Option<String>,
    pub _marker: PhantomData<T>,
}

impl<T> DelayedInner<T> {
    pub fn new(task_id: usize) -> Self {
        Self {
            task_ids: BTreeSet::from([task_id]),
            key: None,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for DelayedInner<T> {
    fn clone(&self) -> Self {
        Self {
            task_ids: self.task_ids.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Serialize for DelayedInner<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // a group of tasks is represented by its last member
        let Some(task_id) = self.task_ids.iter().next_back() else {
            return Err(serde::ser::Error::custom("delayed handle without tasks"));
        };

        let mut json_value = json!({
            UPSTREAM_TASK_ID_KEY: task_id,
        });

        if let Some(key) = &self.key {
            json_value[UPSTREAM_TASK_RESULT_KEY] = Value::String(key.clone());
        }

        json_value.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_upstream_reference() {
        let inner = DelayedInner::<i64>::new(3);
        assert_eq!(
            serde_json::to_value(&inner).unwrap(),
            json!({"upstream_task_id": 3})
        );
    }

    #[test]
    fn test_serializes_key() {
        let mut inner = DelayedInner::<Value>::new(1);
        inner.key = Some("total".into());
        assert_eq!(
            serde_json::to_value(&inner).unwrap(),
            json!({"upstream_task_id": 1, "key": "total"})
        );
    }
}
