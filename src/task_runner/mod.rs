//! TaskRunner - Background Worker Pool
//!
//! ## Responsibilities
//!
//! - Run recognition pipelines off the request path
//! - Isolate task failures: an error or panic is logged and terminates that
//!   one task only, never the worker
//!
//! No retry, no cancellation of in-flight tasks, no ordering guarantee
//! across tasks. Effects within one task stay ordered because a task runs
//! on a single worker start to finish.

use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Default number of persistent workers
pub const DEFAULT_WORKERS: usize = 2;

type Task = BoxFuture<'static, Result<()>>;

/// Fixed-size pool of persistent workers draining one shared queue
pub struct TaskRunner {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskRunner {
    /// Spawn `workers` persistent workers. Must be called inside a tokio
    /// runtime.
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    // Hold the queue lock only while waiting for the next task
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else { break };

                    match AssertUnwindSafe(task).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!(worker_id, error = %e, "Background task failed");
                        }
                        Err(_) => {
                            tracing::error!(worker_id, "Background task panicked");
                        }
                    }
                }
                tracing::debug!(worker_id, "Worker stopped (queue closed)");
            });
        }

        Self { tx }
    }

    /// Enqueue a unit of work; returns immediately without blocking
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.tx.send(task.boxed()).is_err() {
            tracing::error!("Task queue closed, dropping task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_failing_task_does_not_kill_worker() {
        let runner = TaskRunner::new(1);
        let completed = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());

        runner.submit(async { Err(Error::Internal("boom".to_string())) });

        let completed_clone = Arc::clone(&completed);
        let done_clone = Arc::clone(&done);
        runner.submit(async move {
            completed_clone.fetch_add(1, Ordering::SeqCst);
            done_clone.notify_one();
            Ok(())
        });

        tokio::time::timeout(Duration::from_secs(5), done.notified())
            .await
            .expect("second task should still run");
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let runner = TaskRunner::new(1);
        let done = Arc::new(Notify::new());

        runner.submit(async {
            panic!("task blew up");
        });

        let done_clone = Arc::clone(&done);
        runner.submit(async move {
            done_clone.notify_one();
            Ok(())
        });

        tokio::time::timeout(Duration::from_secs(5), done.notified())
            .await
            .expect("worker should survive a panicking task");
    }

    #[tokio::test]
    async fn test_all_submitted_tasks_run() {
        let runner = TaskRunner::new(2);
        let completed = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());
        let total = 20;

        for _ in 0..total {
            let completed = Arc::clone(&completed);
            let done = Arc::clone(&done);
            runner.submit(async move {
                if completed.fetch_add(1, Ordering::SeqCst) + 1 == total {
                    done.notify_one();
                }
                Ok(())
            });
        }

        tokio::time::timeout(Duration::from_secs(5), done.notified())
            .await
            .expect("all tasks should complete");
        assert_eq!(completed.load(Ordering::SeqCst), total);
    }
}
