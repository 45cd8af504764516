use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;

/// Background sweeper that re-attempts due `retrying` deliveries.
///
/// Each sweep loads the due set, marks entries whose subscriber is gone
/// or inactive as permanently failed, and re-runs the rest through the
/// dispatcher. All attempts of a sweep are awaited before the loop looks
/// at the clock or the cancellation token again, so stopping the worker
/// always lets the current iteration finish its bookkeeping.
pub struct RetryWorker {
    dispatcher: Dispatcher,
    cancel: CancellationToken,
}

/// Handle to a running [`RetryWorker`].
pub struct RetryWorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RetryWorkerHandle {
    /// Ask the worker to stop and wait for the current iteration to
    /// drain.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl RetryWorker {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the worker loop onto the runtime.
    pub fn start(dispatcher: Dispatcher) -> RetryWorkerHandle {
        let worker = Self::new(dispatcher);
        let cancel = worker.cancel.clone();
        let task = tokio::spawn(worker.run());
        RetryWorkerHandle { cancel, task }
    }

    /// Run until cancelled, sweeping every `check_interval`.
    pub async fn run(self) {
        let check_interval = self.dispatcher.config().check_interval;
        tracing::info!(interval = ?check_interval, "retry worker started");
        let mut interval = tokio::time::interval(check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.run_once().await,
            }
        }
        tracing::info!("retry worker stopped");
    }

    /// One sweep: process every due retry, awaiting all attempts.
    pub async fn run_once(&self) {
        let now = self.dispatcher.clock().now();
        let due = self.dispatcher.log().pending_retries(now);
        if due.is_empty() {
            return;
        }
        tracing::debug!(count = due.len(), "processing due retries");

        let mut attempts = JoinSet::new();
        for record in due {
            match self.dispatcher.registry().get(record.webhook_id) {
                Some(webhook) if webhook.active => {
                    let dispatcher = self.dispatcher.clone();
                    attempts.spawn(async move {
                        dispatcher
                            .attempt_delivery(record.id, &webhook, &record.event)
                            .await;
                    });
                }
                Some(_) => {
                    self.dispatcher
                        .fail_permanently(record.id, "webhook is inactive".to_string());
                }
                None => {
                    self.dispatcher
                        .fail_permanently(record.id, "webhook no longer registered".to_string());
                }
            }
        }
        while attempts.join_next().await.is_some() {}
    }
}
