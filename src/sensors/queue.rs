//! Serialized BLE command queue.
//!
//! Every GATT operation that touches the radio (connect, service lookup,
//! subscribe, write) goes through one queue per transport. A single worker
//! runs entries strictly in FIFO order and waits a fixed spacing after each
//! one settles, which keeps trainers and sensor firmware from dropping writes.
//!
//! Enqueueing is synchronous: order is fixed at call time, and the returned
//! [`CommandHandle`] is awaited for the operation's own result.

use crate::sensors::types::SensorError;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

/// Spacing after a normal command.
pub const MIN_INTERVAL: Duration = Duration::from_millis(200);

/// Spacing after a device setup step (connect, discovery, subscribe).
pub const DEVICE_INTERVAL: Duration = Duration::from_millis(500);

/// Classification of a queued operation, selecting the spacing that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Plain command write
    Normal,
    /// Connection or GATT setup step
    DeviceSetup,
}

/// Queue timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub min_interval: Duration,
    pub device_interval: Duration,
    /// Per-operation time limit. `None` lets operations run unbounded.
    pub operation_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_interval: MIN_INTERVAL,
            device_interval: DEVICE_INTERVAL,
            operation_timeout: None,
        }
    }
}

impl QueueConfig {
    fn interval_for(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Normal => self.min_interval,
            OperationKind::DeviceSetup => self.device_interval,
        }
    }
}

/// Why a queued operation did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Removed by [`CommandQueue::clear`] before it ran
    #[error("Queue cleared")]
    Cleared,

    /// Exceeded the configured operation timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation itself failed
    #[error(transparent)]
    Operation(#[from] SensorError),

    /// The queue was dropped before the operation settled
    #[error("Command queue stopped")]
    WorkerStopped,
}

impl From<QueueError> for SensorError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Operation(e) => e,
            other => SensorError::BleError(other.to_string()),
        }
    }
}

/// Snapshot of the queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// Entries waiting to run (excludes the one in flight)
    pub queue_length: usize,
    /// Whether an entry is currently running
    pub is_processing: bool,
}

/// Type-erased queued operation.
trait QueuedOperation: Send {
    /// Run the operation and settle its handle. Resolves to `true` on success.
    fn run(self: Box<Self>, timeout: Option<Duration>) -> BoxFuture<'static, bool>;

    /// Settle the handle without running.
    fn reject(self: Box<Self>, error: QueueError);
}

struct Job<T, F> {
    operation: F,
    tx: oneshot::Sender<Result<T, QueueError>>,
}

impl<T, F, Fut> QueuedOperation for Job<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, SensorError>> + Send + 'static,
{
    fn run(self: Box<Self>, timeout: Option<Duration>) -> BoxFuture<'static, bool> {
        let Job { operation, tx } = *self;
        Box::pin(async move {
            let fut = operation();
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result.map_err(QueueError::Operation),
                    Err(_) => Err(QueueError::Timeout(limit)),
                },
                None => fut.await.map_err(QueueError::Operation),
            };
            let ok = result.is_ok();
            if let Err(e) = &result {
                tracing::warn!("Queued operation failed: {}", e);
            }
            // Receiver may have been dropped; the result is simply discarded.
            let _ = tx.send(result);
            ok
        })
    }

    fn reject(self: Box<Self>, error: QueueError) {
        let _ = self.tx.send(Err(error));
    }
}

struct Entry {
    kind: OperationKind,
    description: String,
    operation: Box<dyn QueuedOperation>,
}

struct Shared {
    pending: Mutex<VecDeque<Entry>>,
    notify: Notify,
    processing: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<Entry> {
        self.pending().pop_front()
    }
}

/// Future resolving to a queued operation's result.
#[must_use = "a command handle does nothing unless awaited"]
pub struct CommandHandle<T> {
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> Future for CommandHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(QueueError::WorkerStopped),
        })
    }
}

/// FIFO queue with a single worker task.
pub struct CommandQueue {
    shared: Arc<Shared>,
    config: QueueConfig,
    worker: JoinHandle<()>,
}

impl CommandQueue {
    /// Create the queue and spawn its worker. Must be called within a Tokio runtime.
    pub fn new(config: QueueConfig) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            processing: AtomicBool::new(false),
        });

        let worker = tokio::spawn(Self::run_worker(shared.clone(), config));

        Self {
            shared,
            config,
            worker,
        }
    }

    /// Create a queue with the default spacing and no timeout.
    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append an operation. It runs after every previously enqueued entry.
    pub fn enqueue<T, F, Fut>(
        &self,
        kind: OperationKind,
        description: impl Into<String>,
        operation: F,
    ) -> CommandHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SensorError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let entry = Entry {
            kind,
            description: description.into(),
            operation: Box::new(Job { operation, tx }),
        };

        tracing::trace!("Enqueue {:?} operation: {}", entry.kind, entry.description);
        self.shared.pending().push_back(entry);
        self.shared.notify.notify_one();

        CommandHandle { rx }
    }

    /// Reject every pending entry with [`QueueError::Cleared`].
    ///
    /// The entry in flight, if any, still completes. Returns the number of
    /// rejected entries.
    pub fn clear(&self) -> usize {
        let drained: Vec<Entry> = self.shared.pending().drain(..).collect();
        let count = drained.len();
        for entry in drained {
            tracing::debug!("Rejecting queued operation: {}", entry.description);
            entry.operation.reject(QueueError::Cleared);
        }
        if count > 0 {
            tracing::info!("Cleared {} pending BLE operations", count);
        }
        count
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.shared.pending().len(),
            is_processing: self.shared.processing.load(Ordering::SeqCst),
        }
    }

    async fn run_worker(shared: Arc<Shared>, config: QueueConfig) {
        loop {
            let Some(entry) = shared.pop() else {
                shared.notify.notified().await;
                continue;
            };

            shared.processing.store(true, Ordering::SeqCst);
            tracing::debug!("Running {:?} operation: {}", entry.kind, entry.description);

            let ok = entry.operation.run(config.operation_timeout).await;
            if !ok {
                tracing::debug!("Operation '{}' did not succeed", entry.description);
            }

            shared.processing.store(false, Ordering::SeqCst);
            tokio::time::sleep(config.interval_for(entry.kind)).await;
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}
