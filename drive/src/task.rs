//! This module provides the asynchronous task completion protocol.
//!
//! Several drive operations (move, rename, delete, share) only enqueue a server-side task and answer with a
//! [`TaskHandle`]. The [`TaskWaiter`] turns such a handle into a completed one by polling the task resource.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{DriveApi, TaskHandle};
use crate::Error;

/// Run `future` unless `cancel` fires first, in which case [`Error::Cancelled`] is returned and `future` dropped.
///
/// Dropping an in-flight request future aborts the underlying HTTP call.
pub(crate) async fn cancellable<T>(cancel: &CancellationToken, future: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

/// A polling state machine waiting for a server task to complete.
///
/// # Polling
/// Starting from an initial handle, the waiter:
/// - returns the handle as is if it already reports completion;
/// - otherwise sleeps for the handle poll interval (server-supplied, possibly zero), queries the task status and
///   starts over with the freshly queried handle.
///
/// Only [`Task::STATUS_FINISHED`](crate::api::Task::STATUS_FINISHED) counts as completion: any other status keeps the
/// task pending, and query errors abort the wait as they are.
///
/// # Bounds
/// The wait is bounded by the cancellation token only, unless a timeout is set with [`TaskWaiter::with_timeout()`], in
/// which case [`Error::TaskTimeout`] is returned once it elapses.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// # use drive::api::{DriveApi, TaskHandle};
/// # use drive::task::TaskWaiter;
/// # async fn wait(api: &impl DriveApi, handle: TaskHandle) -> Result<(), drive::Error> {
/// let cancel = tokio_util::sync::CancellationToken::new();
/// let done = TaskWaiter::new(api, &cancel).wait(handle).await?;
///
/// assert!(done.finished);
/// # Ok(())
/// # }
/// # })
/// ```
#[derive(Debug)]
pub struct TaskWaiter<'a, A> {
    api: &'a A,
    cancel: &'a CancellationToken,
    timeout: Option<Duration>,
}

impl<'a, A: DriveApi> TaskWaiter<'a, A> {
    pub fn new(api: &'a A, cancel: &'a CancellationToken) -> Self {
        Self { api, cancel, timeout: None }
    }

    /// Bound every wait by `timeout`, or leave it unbounded with `None`.
    #[inline]
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        Self { timeout, ..self }
    }

    /// Wait for the task behind `handle` to complete and return its last queried handle.
    pub async fn wait(&self, handle: TaskHandle) -> Result<TaskHandle, Error> {
        if handle.finished {
            return Ok(handle);
        }

        let task_id = handle.task_id.clone();

        let bounded = async {
            match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, self.poll(handle))
                    .await
                    .map_err(|_| Error::TaskTimeout(task_id.clone()))?,
                None => self.poll(handle).await,
            }
        };

        cancellable(self.cancel, bounded).await
    }

    async fn poll(&self, mut handle: TaskHandle) -> Result<TaskHandle, Error> {
        let mut polls = 0usize;

        while !handle.finished {
            tokio::time::sleep(handle.poll_interval).await;

            handle = self.api.query_task(&handle.task_id).await?;
            polls += 1;

            tracing::trace!(
                "Task `{}` polled ({polls}), status: {:?}",
                handle.task_id,
                handle.task.as_ref().map(|task| task.status)
            );
        }

        tracing::debug!("Task `{}` finished after {polls} poll(s)", handle.task_id);

        Ok(handle)
    }
}
