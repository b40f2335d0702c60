//! Batch export processor.
//!
//! This module provides the processor that sits between instrumentation call
//! sites and an [`Exporter`]. Producers hand it finished records; a dedicated
//! worker thread exports them in batches.
//!
//! # Architecture
//!
//! ```text
//!   producers ──on_record──▶ BoundedQueue ──▶ export worker ──▶ Exporter
//!                 │                               ▲
//!                 └──── size threshold wake ──────┘
//! ```
//!
//! 1. **Producers** never block: a record is either appended to the
//!    [`BoundedQueue`] or dropped and counted. When the queue holds at least
//!    `max_export_batch_size` records the worker is woken early.
//!
//! 2. **Export worker**: one OS thread running a current-thread tokio runtime.
//!    It wakes on the export interval, on the size threshold, or on a
//!    flush/shutdown request, and exports up to `max_export_batch_size`
//!    records per call, in queue order.
//!
//! 3. **Failures**: every export is bounded by the export timeout and guarded
//!    against panics. A failed batch is logged and dropped; it is never
//!    retried and never surfaces to producers.
//!
//! # Usage
//!
//! ```no_run
//! use telemetry_batch_export::{BatchExportProcessor, BatchExportProcessorOptions, InMemoryExporter};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), telemetry_batch_export::ProcessorError> {
//! let processor = BatchExportProcessor::builder()
//!     .exporter(InMemoryExporter::default())
//!     .options(
//!         BatchExportProcessorOptions::builder()
//!             .max_queue_size(4096)
//!             .max_export_batch_size(1024)
//!             .build()?,
//!     )
//!     .build()?;
//!
//! // processor.on_record(record) from instrumentation call sites
//!
//! processor.shutdown_with_timeout(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use crate::batch::Batch;
use crate::constants::defaults;
use crate::error::{ExportError, ProcessorError};
use crate::exporter::{ExportResult, Exporter};
use crate::lifecycle::{AtomicProcessorState, Processor, ProcessorState};
use crate::logger::Logger;
use crate::options::BatchExportProcessorOptions;
use crate::queue::BoundedQueue;
use crate::record::TelemetryRecord;
use async_trait::async_trait;
use bon::bon;
use futures_util::FutureExt;
use opentelemetry_sdk::Resource;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Module-specific logger
static LOGGER: Logger = Logger::const_new("processor");

type Reply = oneshot::Sender<Result<(), ProcessorError>>;

/// Requests sent from the processor handle to its worker.
enum Control {
    Flush {
        cancel: CancellationToken,
        reply: Reply,
    },
    Shutdown {
        cancel: CancellationToken,
        reply: Reply,
    },
    SetResource(Resource),
}

impl Control {
    /// Token that abandons an export already in flight when this request arrives.
    fn cancel_token(&self) -> Option<&CancellationToken> {
        match self {
            Control::Flush { cancel, .. } | Control::Shutdown { cancel, .. } => Some(cancel),
            Control::SetResource(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    exported: AtomicU64,
    failed_batches: AtomicU64,
}

/// Point-in-time view of a processor's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Records currently waiting in the queue.
    pub queued: usize,
    /// Records dropped because the queue was full, the processor was stopped,
    /// their batch failed to export, or a flush was cancelled.
    pub dropped: u64,
    /// Records delivered by successful exports.
    pub exported: u64,
    /// Export calls that failed, timed out or panicked.
    pub failed_batches: u64,
}

/// Batches records and exports them from a dedicated worker thread.
///
/// See the [module documentation](self) for the overall design.
pub struct BatchExportProcessor {
    queue: Arc<BoundedQueue<TelemetryRecord>>,
    wake: Arc<Notify>,
    control: mpsc::UnboundedSender<Control>,
    state: Arc<AtomicProcessorState>,
    counters: Arc<Counters>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    /// Handle to the worker's runtime, used to time flush and shutdown deadlines.
    runtime: Handle,
    options: BatchExportProcessorOptions,
    exporter_name: &'static str,
}

impl fmt::Debug for BatchExportProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExportProcessor")
            .field("exporter", &self.exporter_name)
            .field("state", &self.state.load())
            .field("options", &self.options)
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[bon]
impl BatchExportProcessor {
    /// Creates the processor and starts its export worker.
    ///
    /// Fails if the worker's runtime or thread cannot be created.
    #[builder]
    pub fn new<E: Exporter>(
        exporter: E,
        #[builder(default)] options: BatchExportProcessorOptions,
        resource: Option<Resource>,
    ) -> Result<Self, ProcessorError> {
        let queue = Arc::new(BoundedQueue::new(options.max_queue_size()));
        let wake = Arc::new(Notify::new());
        let state = Arc::new(AtomicProcessorState::new(ProcessorState::Idle));
        let counters = Arc::new(Counters::default());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let exporter_name = std::any::type_name::<E>();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let runtime_handle = runtime.handle().clone();

        let worker = Worker {
            writer: exporter.new_writer(),
            exporter,
            queue: queue.clone(),
            wake: wake.clone(),
            control: control_rx,
            state: state.clone(),
            counters: counters.clone(),
            resource: resource.unwrap_or_else(|| Resource::builder_empty().build()),
            options,
            buffer: Vec::with_capacity(options.max_export_batch_size()),
            pending: None,
            staged_resource: None,
            abandoned: 0,
            exporter_name,
        };

        let handle = thread::Builder::new()
            .name(defaults::WORKER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(worker.run()))?;

        state.store(ProcessorState::Running);
        LOGGER.debug(format!(
            "BatchExportProcessor.new: started worker for {} (max_queue_size={}, max_export_batch_size={}, export_interval_ms={}, export_timeout_ms={})",
            exporter_name,
            options.max_queue_size(),
            options.max_export_batch_size(),
            options.export_interval_ms(),
            options.export_timeout_ms(),
        ));

        Ok(Self {
            queue,
            wake,
            control: control_tx,
            state,
            counters,
            worker: Mutex::new(Some(handle)),
            runtime: runtime_handle,
            options,
            exporter_name,
        })
    }
}

impl BatchExportProcessor {
    /// Offers a record for export.
    ///
    /// Never blocks and never panics. Returns `false` when the record was
    /// dropped, either because the queue is full or because the processor is
    /// no longer running.
    pub fn on_record(&self, record: TelemetryRecord) -> bool {
        if self.state.load() != ProcessorState::Running {
            self.queue.record_dropped(1);
            LOGGER.debug("BatchExportProcessor.on_record: processor is not running, dropping record");
            return false;
        }

        if self.queue.enqueue(record) {
            // A shutdown may have completed its final drain since the check above
            if self.state.load() == ProcessorState::Stopped {
                self.queue.drain_all();
                return false;
            }
            if self.queue.len() >= self.options.max_export_batch_size() {
                self.wake.notify_one();
            }
            true
        } else {
            let dropped = self.queue.dropped_count();
            if dropped <= 1 || dropped % defaults::DROP_WARNING_INTERVAL == 0 {
                LOGGER.warn(format!(
                    "BatchExportProcessor.on_record: dropping record because queue is full (dropped_records={})",
                    dropped
                ));
            }
            false
        }
    }

    /// Exports every record queued when the flush starts, then returns.
    ///
    /// Returns immediately when the queue is empty or the processor is not
    /// running. If `cancel` fires first, the call returns
    /// [`ProcessorError::Cancelled`] right away: the worker abandons the
    /// in-flight export and discards the queue, even when it was busy with a
    /// timer or size-triggered export when the flush arrived.
    pub async fn force_flush(&self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        self.request_flush(cancel).await
    }

    /// [`force_flush`](Self::force_flush) bounded by `timeout`, counted from this call.
    pub async fn force_flush_with_timeout(&self, timeout: Duration) -> Result<(), ProcessorError> {
        let deadline = self.deadline(timeout);
        let _disarm = deadline.clone().drop_guard();
        self.request_flush(&deadline).await
    }

    async fn request_flush(&self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        if self.state.load() != ProcessorState::Running || self.queue.is_empty() {
            return Ok(());
        }
        LOGGER.debug("BatchExportProcessor.force_flush: flushing records");

        let (reply, response) = oneshot::channel();
        let message = Control::Flush {
            cancel: cancel.clone(),
            reply,
        };
        if self.control.send(message).is_err() {
            return Err(ProcessorError::WorkerGone);
        }
        await_reply(response, cancel).await.unwrap_or_else(|| {
            LOGGER.warn("BatchExportProcessor.force_flush: cancelled before the worker answered");
            Err(ProcessorError::Cancelled { dropped: None })
        })
    }

    /// Drains the queue, stops the worker and shuts the exporter down.
    ///
    /// Only the first call does any work; later calls return `Ok(())`. The
    /// processor is `Stopped` when this returns. If `cancel` fires before the
    /// worker answers, the call returns without joining the worker, which
    /// abandons its export and shuts the exporter down in the background.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        self.request_shutdown(cancel).await
    }

    /// [`shutdown`](Self::shutdown) bounded by `timeout`, counted from this call.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), ProcessorError> {
        let deadline = self.deadline(timeout);
        let _disarm = deadline.clone().drop_guard();
        self.request_shutdown(&deadline).await
    }

    async fn request_shutdown(&self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        if !self
            .state
            .transition(ProcessorState::Running, ProcessorState::ShuttingDown)
        {
            LOGGER.debug("BatchExportProcessor.shutdown: already shut down");
            return Ok(());
        }
        LOGGER.debug("BatchExportProcessor.shutdown: shutting down");

        let (reply, response) = oneshot::channel();
        let message = Control::Shutdown {
            cancel: cancel.clone(),
            reply,
        };
        let answer = if self.control.send(message).is_err() {
            Some(Err(ProcessorError::WorkerGone))
        } else {
            await_reply(response, cancel).await
        };

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match (handle, &answer) {
            // The worker returns right after replying
            (Some(handle), Some(_)) => {
                if handle.join().is_err() {
                    LOGGER.error("BatchExportProcessor.shutdown: export worker panicked");
                }
            }
            (Some(_detached), None) => {
                LOGGER.warn("BatchExportProcessor.shutdown: cancelled, export worker stops in the background");
            }
            (None, _) => {}
        }
        self.state.store(ProcessorState::Stopped);

        let stats = self.stats();
        if stats.dropped > 0 {
            LOGGER.warn(format!(
                "BatchExportProcessor.shutdown: {} dropped {} records over its lifetime",
                self.exporter_name, stats.dropped
            ));
        }
        answer.unwrap_or(Err(ProcessorError::Cancelled { dropped: None }))
    }

    /// Token cancelled once `timeout` has elapsed, timed on the worker's runtime.
    fn deadline(&self, timeout: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let expiry = token.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => expiry.cancel(),
                _ = expiry.cancelled() => {}
            }
        });
        token
    }

    /// Replaces the resource attached to subsequent batches.
    pub fn set_resource(&self, resource: &Resource) {
        if self
            .control
            .send(Control::SetResource(resource.clone()))
            .is_err()
        {
            LOGGER.debug("BatchExportProcessor.set_resource: worker is not running");
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state.load()
    }

    pub fn options(&self) -> &BatchExportProcessorOptions {
        &self.options
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            queued: self.queue.len(),
            dropped: self.queue.dropped_count(),
            exported: self.counters.exported.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
        }
    }
}

/// Waits for the worker's answer, or `None` once `cancel` fires.
async fn await_reply(
    response: oneshot::Receiver<Result<(), ProcessorError>>,
    cancel: &CancellationToken,
) -> Option<Result<(), ProcessorError>> {
    tokio::select! {
        biased;
        reply = response => Some(reply.unwrap_or(Err(ProcessorError::WorkerGone))),
        _ = cancel.cancelled() => None,
    }
}

#[async_trait]
impl Processor for BatchExportProcessor {
    fn on_record(&self, record: TelemetryRecord) -> bool {
        BatchExportProcessor::on_record(self, record)
    }

    async fn force_flush(&self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        BatchExportProcessor::force_flush(self, cancel).await
    }

    async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        BatchExportProcessor::shutdown(self, cancel).await
    }

    fn set_resource(&self, resource: &Resource) {
        BatchExportProcessor::set_resource(self, resource)
    }
}

/// State owned by the export worker thread.
struct Worker<E: Exporter> {
    exporter: E,
    writer: E::Writer,
    queue: Arc<BoundedQueue<TelemetryRecord>>,
    wake: Arc<Notify>,
    control: mpsc::UnboundedReceiver<Control>,
    state: Arc<AtomicProcessorState>,
    counters: Arc<Counters>,
    resource: Resource,
    options: BatchExportProcessorOptions,
    /// Reused for every batch; records live here only during one export.
    buffer: Vec<TelemetryRecord>,
    /// Flush or shutdown request received while an export was in flight.
    pending: Option<Option<Control>>,
    /// Resource received while an export was in flight.
    staged_resource: Option<Resource>,
    /// Records of an in-flight export abandoned for a pending request.
    abandoned: usize,
    exporter_name: &'static str,
}

impl<E: Exporter> Worker<E> {
    async fn run(mut self) {
        let interval = self.options.export_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let message = match self.pending.take() {
                Some(message) => message,
                None => tokio::select! {
                    biased;
                    message = self.control.recv() => message,
                    _ = self.wake.notified() => {
                        self.export_ready().await;
                        ticker.reset();
                        continue;
                    }
                    _ = ticker.tick() => {
                        self.export_ready().await;
                        ticker.reset();
                        continue;
                    }
                },
            };

            match message {
                Some(Control::Flush { cancel, reply }) => {
                    let result = self.drain(&cancel).await;
                    ticker.reset();
                    let _ = reply.send(result);
                }
                Some(Control::Shutdown { cancel, reply }) => {
                    let result = self.finish(&cancel).await;
                    let _ = reply.send(result);
                    return;
                }
                Some(Control::SetResource(resource)) => {
                    self.resource = resource;
                }
                None => {
                    // Processor handle dropped without an explicit shutdown
                    LOGGER.debug("BatchExportProcessor.worker: processor dropped, draining queue");
                    let _ = self.finish(&CancellationToken::new()).await;
                    return;
                }
            }
        }
    }

    /// Exports one batch, then keeps going while a full batch is waiting.
    ///
    /// Bounded by the number of records queued on entry so continuous
    /// production cannot starve control messages. Stops early when a flush or
    /// shutdown request arrives.
    async fn export_ready(&mut self) {
        let max_batch = self.options.max_export_batch_size();
        let mut budget = self.queue.len();
        while budget > 0 {
            let exported = self.export_next(max_batch).await;
            if exported == 0 || self.pending.is_some() {
                break;
            }
            budget = budget.saturating_sub(exported);
            if self.queue.len() < max_batch {
                break;
            }
        }
    }

    /// Dequeues and exports up to `max_items` records; returns how many were taken.
    ///
    /// Keeps listening for control messages during the export. A flush or
    /// shutdown is parked in `pending`, and the export is abandoned as soon
    /// as that request's token fires.
    async fn export_next(&mut self, max_items: usize) -> usize {
        self.buffer.clear();
        let count = self.queue.try_dequeue_batch(max_items, &mut self.buffer);
        if count == 0 {
            return 0;
        }

        let outcome = {
            let export = export_batch(
                &mut self.exporter,
                &mut self.writer,
                &self.buffer,
                &self.resource,
                self.options.export_timeout(),
            );
            tokio::pin!(export);
            let mut abort: Option<CancellationToken> = None;

            loop {
                tokio::select! {
                    biased;
                    result = &mut export => break Some(result),
                    _ = cancelled(abort.as_ref()) => break None,
                    message = self.control.recv(), if self.pending.is_none() => match message {
                        Some(Control::SetResource(resource)) => {
                            self.staged_resource = Some(resource);
                        }
                        message => {
                            abort = message.as_ref().and_then(Control::cancel_token).cloned();
                            self.pending = Some(message);
                        }
                    },
                }
            }
        };

        if let Some(resource) = self.staged_resource.take() {
            self.resource = resource;
        }
        match outcome {
            Some(result) => self.record_outcome(count, result),
            None => {
                self.buffer.clear();
                self.queue.record_dropped(count);
                self.abandoned += count;
                LOGGER.warn(format!(
                    "BatchExportProcessor.export: {} export abandoned by a cancelled request, dropping {} records",
                    self.exporter_name, count
                ));
            }
        }
        count
    }

    fn record_outcome(&mut self, count: usize, result: ExportResult) {
        self.buffer.clear();
        match result {
            Ok(()) => {
                self.counters
                    .exported
                    .fetch_add(count as u64, Ordering::Relaxed);
                LOGGER.debug(format!(
                    "BatchExportProcessor.export: {} exported {} records",
                    self.exporter_name, count
                ));
            }
            Err(err) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.queue.record_dropped(count);
                LOGGER.warn(format!(
                    "BatchExportProcessor.export: {} failed to export batch, dropping {} records: {}",
                    self.exporter_name, count, err
                ));
            }
        }
    }

    /// Exports the records queued on entry, batch by batch.
    async fn drain(&mut self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        let max_batch = self.options.max_export_batch_size();
        let mut remaining = self.queue.len();

        loop {
            // An export abandoned for this request counts even when the queue is empty
            if cancel.is_cancelled() && (remaining > 0 || self.abandoned > 0) {
                return Err(self.abandon(0));
            }
            if remaining == 0 {
                break;
            }

            self.buffer.clear();
            let count = self
                .queue
                .try_dequeue_batch(max_batch.min(remaining), &mut self.buffer);
            if count == 0 {
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = export_batch(
                    &mut self.exporter,
                    &mut self.writer,
                    &self.buffer,
                    &self.resource,
                    self.options.export_timeout(),
                ) => Some(result),
            };
            match outcome {
                Some(result) => self.record_outcome(count, result),
                None => {
                    self.buffer.clear();
                    return Err(self.abandon(count));
                }
            }
            remaining = remaining.saturating_sub(count);
        }
        Ok(())
    }

    /// Drops the in-flight batch and everything still queued.
    fn abandon(&mut self, in_flight: usize) -> ProcessorError {
        self.queue.record_dropped(in_flight);
        let dropped = std::mem::take(&mut self.abandoned) + in_flight + self.queue.drain_all();
        LOGGER.warn(format!(
            "BatchExportProcessor.drain: cancelled, {} dropped {} records",
            self.exporter_name, dropped
        ));
        ProcessorError::Cancelled {
            dropped: Some(dropped),
        }
    }

    /// Final drain followed by exporter shutdown.
    async fn finish(&mut self, cancel: &CancellationToken) -> Result<(), ProcessorError> {
        let drained = self.drain(cancel).await;
        let closed = self.exporter.shutdown();
        self.state.store(ProcessorState::Stopped);

        // Records enqueued while the final drain was running
        let stranded = self.queue.drain_all();
        if stranded > 0 {
            LOGGER.debug(format!(
                "BatchExportProcessor.shutdown: dropped {} records enqueued during shutdown",
                stranded
            ));
        }

        if let Err(err) = &closed {
            LOGGER.warn(format!(
                "BatchExportProcessor.shutdown: {} failed to shut down: {}",
                self.exporter_name, err
            ));
        }
        drained?;
        closed.map_err(ProcessorError::from)
    }
}

/// Runs one export, bounded by `timeout` and guarded against panics.
async fn export_batch<E: Exporter>(
    exporter: &mut E,
    writer: &mut E::Writer,
    records: &[TelemetryRecord],
    resource: &Resource,
    timeout: Option<Duration>,
) -> ExportResult {
    let batch = Batch::new(records, resource);
    let started = std::panic::catch_unwind(AssertUnwindSafe(move || {
        let exporter = exporter;
        let writer = writer;
        exporter.export(batch, writer)
    }));
    let export = match started {
        Ok(export) => AssertUnwindSafe(export).catch_unwind(),
        Err(panic) => return Err(ExportError::Panicked(panic_message(panic.as_ref()))),
    };

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, export).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => return Err(ExportError::Timeout(limit)),
        },
        None => export.await,
    };
    outcome.unwrap_or_else(|panic| Err(ExportError::Panicked(panic_message(panic.as_ref()))))
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchWriter;
    use crate::exporter::{CollectingWriter, InMemoryExporter};
    use crate::record::{InstrumentationScope, LogRecord, Severity, Signal};
    use futures_util::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use std::time::SystemTime;

    fn options(queue: usize, batch: usize, interval_ms: u64, timeout_ms: i64) -> BatchExportProcessorOptions {
        BatchExportProcessorOptions::builder()
            .max_queue_size(queue)
            .max_export_batch_size(batch)
            .export_interval_ms(interval_ms)
            .export_timeout_ms(timeout_ms)
            .build()
            .unwrap()
    }

    fn create_test_record(body: &str) -> TelemetryRecord {
        TelemetryRecord::log(
            Arc::new(InstrumentationScope::builder("test").build()),
            LogRecord {
                timestamp: SystemTime::now(),
                severity: Severity::Info,
                body: body.to_string().into(),
                attributes: Vec::new(),
                trace_id: None,
                span_id: None,
            },
        )
    }

    fn bodies(records: &[TelemetryRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| match r.payload() {
                Signal::Log(log) => log.body.to_string(),
                _ => String::new(),
            })
            .collect()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Exporter whose behaviour is chosen per test.
    #[derive(Debug, Clone, Copy)]
    enum Behaviour {
        Fail,
        Panic,
        Hang,
    }

    #[derive(Debug)]
    struct MisbehavingExporter {
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl MisbehavingExporter {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: Arc::new(AtomicUsize::new(0)),
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Exporter for MisbehavingExporter {
        type Writer = CollectingWriter;

        fn new_writer(&self) -> Self::Writer {
            CollectingWriter::default()
        }

        fn export<'a>(
            &'a mut self,
            batch: Batch<'a>,
            writer: &'a mut Self::Writer,
        ) -> BoxFuture<'a, ExportResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            batch.write_to(writer);
            match self.behaviour {
                Behaviour::Fail => Box::pin(async {
                    Err(ExportError::Transport("connection refused".to_string()))
                }),
                Behaviour::Panic => panic!("exporter bug"),
                Behaviour::Hang => Box::pin(std::future::pending()),
            }
        }

        fn shutdown(&mut self) -> ExportResult {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_flush_exports_in_fifo_order() {
        let exporter = InMemoryExporter::default();
        let handle = exporter.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(100, 3, 60_000, 1000))
            .build()
            .unwrap();

        for i in 0..10 {
            assert!(processor.on_record(create_test_record(&format!("r{}", i))));
        }
        processor
            .force_flush(&CancellationToken::new())
            .await
            .unwrap();

        let exported = handle.exported_records();
        let expected: Vec<String> = (0..10).map(|i| format!("r{}", i)).collect();
        assert_eq!(bodies(&exported), expected);
        assert!(handle.exported_batches().iter().all(|b| b.len() <= 3));
        assert_eq!(processor.stats().exported, 10);
        assert_eq!(processor.stats().queued, 0);

        processor.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_with_empty_queue_does_not_export() {
        let exporter = MisbehavingExporter::new(Behaviour::Fail);
        let calls = exporter.calls.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(10, 5, 60_000, 1000))
            .build()
            .unwrap();

        processor
            .force_flush_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        processor.shutdown(&CancellationToken::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_interval_triggers_export() {
        let exporter = InMemoryExporter::default();
        let handle = exporter.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(10, 5, 20, 1000))
            .build()
            .unwrap();

        processor.on_record(create_test_record("only"));
        wait_for(|| !handle.exported_records().is_empty()).await;

        assert_eq!(bodies(&handle.exported_records()), vec!["only".to_string()]);
        processor.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_size_threshold_triggers_export_before_interval() {
        let exporter = InMemoryExporter::default();
        let handle = exporter.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(10, 2, 60_000, 1000))
            .build()
            .unwrap();

        processor.on_record(create_test_record("a"));
        processor.on_record(create_test_record("b"));
        wait_for(|| handle.exported_records().len() == 2).await;

        assert_eq!(bodies(&handle.exported_records()), vec!["a", "b"]);
        processor.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_small_queue_scenario() {
        let exporter = InMemoryExporter::default();
        let handle = exporter.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(4, 2, 50, 100))
            .build()
            .unwrap();

        let accepted: Vec<String> = (0..5)
            .map(|i| format!("r{}", i))
            .filter(|body| processor.on_record(create_test_record(body)))
            .collect();
        let stats = processor.stats();
        // The worker may wake between enqueues, so one slot can free up early
        assert!(accepted.len() >= 4);
        assert_eq!(accepted.len() as u64 + stats.dropped, 5);

        tokio::time::sleep(Duration::from_millis(60)).await;
        wait_for(|| handle.exported_records().len() == accepted.len()).await;

        let batches = handle.exported_batches();
        assert!(batches.len() >= 2);
        assert!(batches.iter().all(|b| b.len() <= 2));
        assert_eq!(bodies(&handle.exported_records()), accepted);

        processor.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_exporter_never_reaches_producers() {
        let exporter = MisbehavingExporter::new(Behaviour::Fail);
        let calls = exporter.calls.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(4, 2, 10, 100))
            .build()
            .unwrap();

        for i in 0..4 {
            processor.on_record(create_test_record(&format!("r{}", i)));
        }
        wait_for(|| processor.stats().failed_batches >= 2).await;
        let stats = processor.stats();
        assert!(stats.failed_batches >= 2);
        assert_eq!(stats.exported, 0);
        assert!(stats.dropped >= 4);

        // Still accepting records after failures
        assert!(processor.on_record(create_test_record("after")));
        processor.force_flush(&CancellationToken::new()).await.unwrap();
        wait_for(|| calls.load(Ordering::SeqCst) >= 3).await;
        assert!(calls.load(Ordering::SeqCst) >= 3);

        processor.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_exporter_is_treated_as_failure() {
        let processor = BatchExportProcessor::builder()
            .exporter(MisbehavingExporter::new(Behaviour::Panic))
            .options(options(10, 5, 60_000, 100))
            .build()
            .unwrap();

        processor.on_record(create_test_record("boom"));
        processor.force_flush(&CancellationToken::new()).await.unwrap();

        let stats = processor.stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(processor.state(), ProcessorState::Running);

        processor.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_export_timeout_is_a_failure() {
        let processor = BatchExportProcessor::builder()
            .exporter(MisbehavingExporter::new(Behaviour::Hang))
            .options(options(10, 5, 60_000, 20))
            .build()
            .unwrap();

        processor.on_record(create_test_record("slow"));
        processor
            .force_flush_with_timeout(Duration::from_secs(5))
            .await
            .unwrap();

        let stats = processor.stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.dropped, 1);

        processor.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_flush_drops_remaining_records() {
        let processor = BatchExportProcessor::builder()
            .exporter(MisbehavingExporter::new(Behaviour::Hang))
            .options(options(10, 2, 60_000, -1))
            .build()
            .unwrap();

        for i in 0..5 {
            processor.on_record(create_test_record(&format!("r{}", i)));
        }
        let result = processor
            .force_flush_with_timeout(Duration::from_millis(30))
            .await;

        assert!(
            matches!(result, Err(ProcessorError::Cancelled { .. })),
            "expected cancellation, got {:?}",
            result
        );
        // The worker discards the queue once it sees the expired deadline
        wait_for(|| processor.stats().queued == 0).await;
        assert_eq!(processor.stats().queued, 0);
        assert_eq!(processor.stats().dropped, 5);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let _ = processor.shutdown(&cancelled).await;
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_exports_remaining_records() {
        let exporter = InMemoryExporter::default();
        let handle = exporter.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(10, 5, 60_000, 1000))
            .build()
            .unwrap();

        processor.on_record(create_test_record("r1"));
        processor.on_record(create_test_record("r2"));
        processor.shutdown(&CancellationToken::new()).await.unwrap();

        assert_eq!(bodies(&handle.exported_records()), vec!["r1", "r2"]);
        assert!(handle.is_shutdown());
        assert_eq!(processor.state(), ProcessorState::Stopped);

        // New records are dropped after shutdown
        assert!(!processor.on_record(create_test_record("r3")));
        assert_eq!(handle.exported_records().len(), 2);
        assert_eq!(processor.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let exporter = MisbehavingExporter::new(Behaviour::Fail);
        let shutdowns = exporter.shutdowns.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .build()
            .unwrap();

        processor.shutdown(&CancellationToken::new()).await.unwrap();
        let first = processor.stats();
        processor.shutdown(&CancellationToken::new()).await.unwrap();
        processor
            .force_flush(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(processor.stats(), first);
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_record_processing() {
        let exporter = InMemoryExporter::default();
        let handle = exporter.clone();
        let processor = Arc::new(
            BatchExportProcessor::builder()
                .exporter(exporter)
                .options(options(1000, 25, 60_000, 1000))
                .build()
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let processor = processor.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..10 {
                    processor.on_record(create_test_record(&format!("r_{}_{}", i, j)));
                }
            }));
        }
        for task in handles {
            task.await.unwrap();
        }

        processor.shutdown(&CancellationToken::new()).await.unwrap();

        assert_eq!(handle.exported_records().len(), 100);
        assert_eq!(processor.stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_set_resource_reaches_writer() {
        #[derive(Debug, Default)]
        struct ResourceWriter {
            service: Option<String>,
        }

        impl BatchWriter for ResourceWriter {
            fn begin_batch(&mut self, resource: &Resource) {
                self.service = resource
                    .get(&opentelemetry::Key::from_static_str("service.name"))
                    .map(|v| v.to_string());
            }
            fn begin_instrumentation_scope(&mut self, _scope: &InstrumentationScope) {}
            fn write(&mut self, _record: &TelemetryRecord) {}
            fn end_instrumentation_scope(&mut self) {}
            fn end_batch(&mut self) {}
        }

        #[derive(Debug)]
        struct ResourceExporter {
            seen: Arc<Mutex<Vec<Option<String>>>>,
        }

        impl Exporter for ResourceExporter {
            type Writer = ResourceWriter;

            fn new_writer(&self) -> Self::Writer {
                ResourceWriter::default()
            }

            fn export<'a>(
                &'a mut self,
                batch: Batch<'a>,
                writer: &'a mut Self::Writer,
            ) -> BoxFuture<'a, ExportResult> {
                batch.write_to(writer);
                self.seen.lock().unwrap().push(writer.service.clone());
                Box::pin(async { Ok(()) })
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = BatchExportProcessor::builder()
            .exporter(ResourceExporter { seen: seen.clone() })
            .options(options(10, 5, 60_000, 1000))
            .build()
            .unwrap();

        processor.set_resource(
            &Resource::builder_empty()
                .with_service_name("checkout")
                .build(),
        );
        processor.on_record(create_test_record("r"));
        processor.force_flush(&CancellationToken::new()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some("checkout".to_string())]);
        processor.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_interrupts_timer_export() {
        let exporter = MisbehavingExporter::new(Behaviour::Hang);
        let shutdowns = exporter.shutdowns.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(10, 2, 10, -1))
            .build()
            .unwrap();

        processor.on_record(create_test_record("stuck"));
        // Let the interval start an export that never completes
        tokio::time::sleep(Duration::from_millis(100)).await;

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), processor.shutdown(&cancelled))
            .await
            .expect("shutdown should not wait for the stuck export");

        assert!(matches!(result, Err(ProcessorError::Cancelled { .. })));
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert!(!processor.on_record(create_test_record("late")));

        // The worker abandons the export and still shuts the exporter down
        wait_for(|| shutdowns.load(Ordering::SeqCst) == 1).await;
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        wait_for(|| processor.stats().dropped == 2).await;
        assert_eq!(processor.stats().dropped, 2);
        assert_eq!(processor.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_flush_timeout_counts_while_worker_is_busy() {
        let exporter = MisbehavingExporter::new(Behaviour::Hang);
        let calls = exporter.calls.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(10, 2, 10, -1))
            .build()
            .unwrap();

        processor.on_record(create_test_record("stuck"));
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;
        processor.on_record(create_test_record("waiting"));

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            processor.force_flush_with_timeout(Duration::from_millis(50)),
        )
        .await
        .expect("flush should be bounded by its own timeout");

        assert!(matches!(result, Err(ProcessorError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(processor.state(), ProcessorState::Running);

        // Both the in-flight batch and the queued record are discarded
        wait_for(|| processor.stats().dropped == 2).await;
        let stats = processor.stats();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.queued, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            processor.shutdown_with_timeout(Duration::from_millis(50)),
        )
        .await
        .expect("shutdown should be bounded by its own timeout");
        assert!(result.is_ok());
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_timeout_interrupts_size_triggered_export() {
        let exporter = MisbehavingExporter::new(Behaviour::Hang);
        let calls = exporter.calls.clone();
        let shutdowns = exporter.shutdowns.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(10, 2, 60_000, -1))
            .build()
            .unwrap();

        processor.on_record(create_test_record("a"));
        processor.on_record(create_test_record("b"));
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            processor.shutdown_with_timeout(Duration::from_millis(50)),
        )
        .await
        .expect("shutdown should be bounded by its own timeout");

        assert!(matches!(result, Err(ProcessorError::Cancelled { .. })));
        assert_eq!(processor.state(), ProcessorState::Stopped);
        wait_for(|| shutdowns.load(Ordering::SeqCst) == 1).await;
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(processor.stats().dropped, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_records_racing_shutdown_are_exported_or_dropped() {
        let exporter = InMemoryExporter::default();
        let handle = exporter.clone();
        let processor = Arc::new(
            BatchExportProcessor::builder()
                .exporter(exporter)
                .options(options(10_000, 64, 60_000, 1000))
                .build()
                .unwrap(),
        );

        let producers: Vec<_> = (0..4)
            .map(|i| {
                let processor = processor.clone();
                std::thread::spawn(move || {
                    for j in 0..2000 {
                        processor.on_record(create_test_record(&format!("r_{}_{}", i, j)));
                    }
                })
            })
            .collect();

        processor.shutdown(&CancellationToken::new()).await.unwrap();
        for producer in producers {
            producer.join().unwrap();
        }

        // Nothing is left behind in the queue once the processor is stopped
        let stats = processor.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.exported + stats.dropped, 8000);
        assert_eq!(handle.exported_records().len() as u64, stats.exported);
    }

    #[test]
    fn test_cancelled_error_reports_known_drop_count() {
        let known = ProcessorError::Cancelled { dropped: Some(3) };
        assert_eq!(
            known.to_string(),
            "operation cancelled before the queue was drained, 3 records dropped"
        );
        let unknown = ProcessorError::Cancelled { dropped: None };
        assert_eq!(
            unknown.to_string(),
            "operation cancelled before the queue was drained"
        );
    }

    #[test]
    fn test_dropping_processor_drains_queue() {
        let exporter = InMemoryExporter::default();
        let handle = exporter.clone();
        let processor = BatchExportProcessor::builder()
            .exporter(exporter)
            .options(options(10, 5, 60_000, 1000))
            .build()
            .unwrap();

        processor.on_record(create_test_record("late"));
        drop(processor);

        for _ in 0..200 {
            if handle.is_shutdown() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_shutdown());
        assert_eq!(bodies(&handle.exported_records()), vec!["late"]);
    }
}
