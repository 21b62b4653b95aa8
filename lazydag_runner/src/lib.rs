use std::{
    sync::mpsc::{channel, Sender},
    thread,
};

use anyhow::{anyhow, bail, Result};
use backend::Backend;
use blanket_backend::BlanketBackend;
use lazydag_task::ordered_queued_task::OrderedQueuedTask;
use log::{debug, error};

pub mod backend;
pub mod blanket_backend;
pub mod in_memory_backend;
pub mod run;

/// Drains the backend's priority queue with at most `max_parallelism` worker
/// threads. Returns once no task is queued and no worker is busy.
///
/// Task failures are recorded in the backend; only backend errors (or a
/// worker thread dying) are returned here.
pub fn run_in_memory<U>(backend: &mut U, max_parallelism: usize) -> Result<()>
where
    U: Backend + BlanketBackend + Clone + Send + 'static,
{
    if max_parallelism == 0 {
        bail!("max_parallelism must be at least 1");
    }

    let (tx, rx) = channel::<Result<()>>();
    let mut current_parallel_tasks_count = 0;
    let mut first_error: Option<anyhow::Error> = None;

    loop {
        while first_error.is_none() && current_parallel_tasks_count < max_parallelism {
            let Some(ordered_queued_task) = backend.pop_priority_queue()? else {
                break;
            };
            spawn_worker(backend.clone(), ordered_queued_task, tx.clone());
            current_parallel_tasks_count += 1;
        }

        if current_parallel_tasks_count == 0 {
            break;
        }

        let finished = rx
            .recv()
            .map_err(|_| anyhow!("worker channel closed unexpectedly"))?;
        current_parallel_tasks_count -= 1;

        if let Err(err) = finished {
            error!("worker failed: {err:#}");
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn spawn_worker<U>(mut backend: U, ordered_queued_task: OrderedQueuedTask, tx: Sender<Result<()>>)
where
    U: Backend + BlanketBackend + Send + 'static,
{
    thread::spawn(move || {
        let queued_task = &ordered_queued_task.queued_task;
        debug!(
            "worker picked task {} (attempt {})",
            queued_task.task_id, queued_task.attempt
        );

        let result = backend.work(queued_task);
        // the receiver only goes away once the pool has returned
        let _ = tx.send(result);
    });
}
