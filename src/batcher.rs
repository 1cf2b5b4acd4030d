//! Time and size windowed request coalescing
//!
//! Requests handed to [`RequestBatcher::add_request`] are queued to a single
//! worker task. The first pending request opens a window, and only requests
//! submitted within `wait_time_ms` of it join that window; later arrivals
//! open the next one. A window flushes when `batch_size` requests have
//! joined or `max_wait_time_ms` has passed since it opened, whichever comes
//! first.
//!
//! A flushed window becomes one upstream call (a lone request goes to the
//! single-completion endpoint). The whole batch is retried as a unit and
//! each caller receives the result at its own position, so the n-th request
//! in a window gets the n-th result. A batch failure fails every request in
//! it. Once flushed, a batch runs to completion even if callers stop waiting.
//!
//! With batching disabled, `add_request` dispatches each request on its own
//! through the same retry strategy, with identical result semantics.

use crate::config::BatchingConfig;
use crate::error::UpstreamError;
use crate::metrics::Metrics;
use crate::resilience::{RetryError, RetryStrategy};
use crate::upstream::{CompletionBackend, CompletionRequest, CompletionResponse};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result delivered to each caller
pub type DispatchResult = Result<CompletionResponse, RetryError<UpstreamError>>;

/// Why a window was flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// `batch_size` reached
    Size,
    /// Window open for `max_wait_time_ms`
    MaxWait,
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::MaxWait => "max_wait",
            Self::Shutdown => "shutdown",
        }
    }
}

struct Pending {
    request: CompletionRequest,
    reply: oneshot::Sender<DispatchResult>,
    submitted_at: Instant,
}

/// A window of pending requests
struct Window {
    items: Vec<Pending>,
    opened_at: Instant,
}

impl Window {
    fn open(first: Pending) -> Self {
        Self {
            opened_at: first.submitted_at,
            items: vec![first],
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    /// Requests submitted at or after this instant go to the next window
    fn closes_at(&self, wait_time: Duration) -> Instant {
        self.opened_at + wait_time
    }

    fn flush_at(&self, max_wait: Duration) -> Instant {
        self.opened_at + max_wait
    }

    fn admits(&self, item: &Pending, wait_time: Duration) -> bool {
        item.submitted_at < self.closes_at(wait_time)
    }
}

#[derive(Clone)]
struct Dispatcher {
    backend: Arc<dyn CompletionBackend>,
    retry: RetryStrategy,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    async fn single(
        &self,
        request: &CompletionRequest,
        cancel: Option<&CancellationToken>,
    ) -> DispatchResult {
        let mut attempts = 0;
        let result = self
            .retry
            .execute_with_retry(
                |attempt| {
                    attempts = attempt + 1;
                    self.backend.complete(request)
                },
                UpstreamError::is_retryable,
                cancel,
            )
            .await;
        self.record_attempts(attempts);
        result
    }

    async fn batch(&self, items: Vec<Pending>, reason: FlushReason) {
        let size = items.len();
        if let Some(metrics) = &self.metrics {
            metrics.batch_dispatched(size);
        }
        tracing::debug!(batch_size = size, reason = reason.as_str(), "Flushing batch");

        if size == 1 {
            for item in items {
                let result = self.single(&item.request, None).await;
                // Receiver gone means the caller stopped waiting
                let _ = item.reply.send(result);
            }
            return;
        }

        let (requests, replies): (Vec<CompletionRequest>, Vec<oneshot::Sender<DispatchResult>>) =
            items.into_iter().map(|p| (p.request, p.reply)).unzip();

        let mut attempts = 0;
        let result = self
            .retry
            .execute_with_retry(
                |attempt| {
                    attempts = attempt + 1;
                    self.backend.complete_batch(&requests)
                },
                UpstreamError::is_retryable,
                None,
            )
            .await;
        self.record_attempts(attempts);

        match result {
            Ok(responses) => {
                for (reply, response) in replies.into_iter().zip(responses) {
                    let _ = reply.send(Ok(response));
                }
            }
            Err(error) => {
                tracing::warn!(batch_size = size, error = %error, "Batch dispatch failed");
                for reply in replies {
                    let _ = reply.send(Err(error.clone()));
                }
            }
        }
    }

    fn record_attempts(&self, attempts: u32) {
        if let Some(metrics) = &self.metrics {
            metrics.retry_attempts(u64::from(attempts.saturating_sub(1)));
        }
    }
}

/// Coalesces concurrent requests into batched upstream calls
pub struct RequestBatcher {
    config: BatchingConfig,
    dispatcher: Dispatcher,
    sender: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RequestBatcher {
    /// Create a batcher; when batching is enabled this spawns the worker task
    /// and must be called inside a Tokio runtime
    pub fn new(
        config: BatchingConfig,
        backend: Arc<dyn CompletionBackend>,
        retry: RetryStrategy,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let dispatcher = Dispatcher {
            backend,
            retry,
            metrics,
        };

        let (sender, worker) = if config.enable_batching {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = tokio::spawn(run_worker(rx, config.clone(), dispatcher.clone()));
            tracing::info!(
                batch_size = config.batch_size,
                wait_time_ms = config.wait_time_ms,
                max_wait_time_ms = config.max_wait_time_ms,
                "Request batching enabled"
            );
            (Some(tx), Some(worker))
        } else {
            (None, None)
        };

        Self {
            config,
            dispatcher,
            sender: Mutex::new(sender),
            worker: tokio::sync::Mutex::new(worker),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enable_batching
    }

    /// Queue a request; the returned receiver resolves once its batch returns
    ///
    /// With batching disabled the request is dispatched on a spawned task.
    /// After shutdown the receiver resolves to a `Shutdown` error at once.
    pub fn submit(&self, request: CompletionRequest) -> oneshot::Receiver<DispatchResult> {
        let (reply, receiver) = oneshot::channel();

        if !self.config.enable_batching {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                let result = dispatcher.single(&request, None).await;
                let _ = reply.send(result);
            });
            return receiver;
        }

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let pending = Pending {
            request,
            reply,
            submitted_at: Instant::now(),
        };
        match sender {
            Some(tx) => {
                if let Err(mpsc::error::SendError(pending)) = tx.send(pending) {
                    let _ = pending.reply.send(Err(shutdown_error()));
                }
            }
            None => {
                let _ = pending.reply.send(Err(shutdown_error()));
            }
        }
        receiver
    }

    /// Submit a request and wait for its result
    pub async fn add_request(&self, request: CompletionRequest) -> DispatchResult {
        self.add_request_with_cancel(request, None).await
    }

    /// Like [`add_request`](Self::add_request), but an unbatched request stops
    /// retrying once `cancel` fires
    ///
    /// A request that joined a window is never cancelled; its batch runs to
    /// completion for everyone else in it.
    pub async fn add_request_with_cancel(
        &self,
        request: CompletionRequest,
        cancel: Option<&CancellationToken>,
    ) -> DispatchResult {
        if !self.config.enable_batching {
            return self.dispatcher.single(&request, cancel).await;
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(RetryError::Cancelled {
                last_error: None,
                attempts: 0,
            });
        }
        self.submit(request)
            .await
            .unwrap_or_else(|_| Err(shutdown_error()))
    }

    /// Stop accepting requests, flush the open window and wait for every
    /// in-flight batch to finish
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Batch worker terminated abnormally");
            }
        }
    }
}

fn shutdown_error() -> RetryError<UpstreamError> {
    RetryError::NonRetryable {
        error: UpstreamError::Shutdown,
        attempts: 0,
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Pending>,
    config: BatchingConfig,
    dispatcher: Dispatcher,
) {
    let wait_time = Duration::from_millis(config.wait_time_ms);
    let max_wait = Duration::from_millis(config.max_wait_time_ms);
    let batch_size = config.batch_size.max(1);
    let mut in_flight = JoinSet::new();
    // Accepting new members
    let mut open: Option<Window> = None;
    // Membership closed, waiting for max wait; oldest first
    let mut closed: VecDeque<Window> = VecDeque::new();

    loop {
        while in_flight.try_join_next().is_some() {}

        let now = Instant::now();
        if open.as_ref().is_some_and(|w| now >= w.closes_at(wait_time)) {
            closed.extend(open.take());
        }
        while closed.front().is_some_and(|w| now >= w.flush_at(max_wait)) {
            if let Some(due) = closed.pop_front() {
                flush(&mut in_flight, &dispatcher, due, FlushReason::MaxWait);
            }
        }

        let next_deadline = open
            .as_ref()
            .map(|w| w.closes_at(wait_time))
            .into_iter()
            .chain(closed.front().map(|w| w.flush_at(max_wait)))
            .min();

        let received = match next_deadline {
            Some(deadline) => tokio::select! {
                received = rx.recv() => received,
                _ = tokio::time::sleep_until(deadline) => continue,
            },
            None => rx.recv().await,
        };

        let Some(item) = received else {
            for last in closed.drain(..).chain(open.take()) {
                flush(&mut in_flight, &dispatcher, last, FlushReason::Shutdown);
            }
            break;
        };

        match open.as_mut() {
            Some(window) if window.admits(&item, wait_time) => window.items.push(item),
            _ => {
                closed.extend(open.take());
                open = Some(Window::open(item));
            }
        }
        if open.as_ref().is_some_and(|w| w.len() >= batch_size) {
            if let Some(full) = open.take() {
                flush(&mut in_flight, &dispatcher, full, FlushReason::Size);
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    tracing::debug!("Batch worker stopped");
}

fn flush(
    in_flight: &mut JoinSet<()>,
    dispatcher: &Dispatcher,
    window: Window,
    reason: FlushReason,
) {
    let dispatcher = dispatcher.clone();
    in_flight.spawn(async move { dispatcher.batch(window.items, reason).await });
}
