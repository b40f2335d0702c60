//! The exporter contract and an in-memory implementation.
//!
//! An [`Exporter`] turns a [`Batch`] into a wire payload and delivers it. The
//! processor owns its exporter outright and only ever calls it from the
//! export worker, so `export` takes `&mut self` and implementations need no
//! internal locking.
//!
//! Each exporter names the [`BatchWriter`] it serializes with. The worker
//! creates one writer through [`Exporter::new_writer`] when it starts and
//! passes it back into every `export` call, so buffers are reused across
//! batches without any thread-local or global cache.

use crate::batch::{Batch, BatchWriter};
use crate::error::ExportError;
use crate::record::{InstrumentationScope, TelemetryRecord};
use futures_util::future::BoxFuture;
use opentelemetry_sdk::Resource;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

/// Result of one export call. `Err` means the batch was not delivered.
pub type ExportResult = Result<(), ExportError>;

/// Serializes and transmits batches to a single destination.
pub trait Exporter: Send + Debug + 'static {
    /// Writer this exporter serializes batches with.
    type Writer: BatchWriter + Send + 'static;

    /// Creates the writer the export worker will own and reuse.
    fn new_writer(&self) -> Self::Writer;

    /// Exports one batch.
    ///
    /// Expected delivery failures are reported as `Err`; the processor treats
    /// a panic the same way. The processor bounds the returned future by its
    /// export timeout and never calls `export` concurrently with itself.
    fn export<'a>(
        &'a mut self,
        batch: Batch<'a>,
        writer: &'a mut Self::Writer,
    ) -> BoxFuture<'a, ExportResult>;

    /// Releases transport resources. Called once, even if `export` never was.
    fn shutdown(&mut self) -> ExportResult {
        Ok(())
    }
}

/// Writer that clones records back out of a batch, in protocol order.
#[derive(Debug, Default)]
pub struct CollectingWriter {
    records: Vec<TelemetryRecord>,
    scopes: Vec<String>,
}

impl CollectingWriter {
    /// Takes the records written since the last `begin_batch`.
    pub fn take_records(&mut self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut self.records)
    }

    /// Scope names in the order their groups were opened.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

impl BatchWriter for CollectingWriter {
    fn begin_batch(&mut self, _resource: &Resource) {
        self.records.clear();
        self.scopes.clear();
    }

    fn begin_instrumentation_scope(&mut self, scope: &InstrumentationScope) {
        self.scopes.push(scope.name().to_string());
    }

    fn write(&mut self, record: &TelemetryRecord) {
        self.records.push(record.clone());
    }

    fn end_instrumentation_scope(&mut self) {}

    fn end_batch(&mut self) {}
}

#[derive(Debug, Default)]
struct InMemoryState {
    batches: Vec<Vec<TelemetryRecord>>,
    shutdown: bool,
}

/// Exporter that keeps every exported batch in memory.
///
/// Clones share the same storage, so a clone kept by the caller can inspect
/// what the processor exported.
///
/// ```
/// use telemetry_batch_export::InMemoryExporter;
///
/// let exporter = InMemoryExporter::default();
/// let handle = exporter.clone();
/// // hand `exporter` to a BatchExportProcessor, inspect through `handle`
/// assert!(handle.exported_records().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryExporter {
    fn with_state<R>(&self, f: impl FnOnce(&mut InMemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Exported batches, oldest first.
    pub fn exported_batches(&self) -> Vec<Vec<TelemetryRecord>> {
        self.with_state(|state| state.batches.clone())
    }

    /// All exported records, flattened in export order.
    pub fn exported_records(&self) -> Vec<TelemetryRecord> {
        self.with_state(|state| state.batches.iter().flatten().cloned().collect())
    }

    pub fn is_shutdown(&self) -> bool {
        self.with_state(|state| state.shutdown)
    }

    /// Forgets everything exported so far.
    pub fn reset(&self) {
        self.with_state(|state| state.batches.clear());
    }
}

impl Exporter for InMemoryExporter {
    type Writer = CollectingWriter;

    fn new_writer(&self) -> Self::Writer {
        CollectingWriter::default()
    }

    fn export<'a>(
        &'a mut self,
        batch: Batch<'a>,
        writer: &'a mut Self::Writer,
    ) -> BoxFuture<'a, ExportResult> {
        let result = if self.is_shutdown() {
            Err(ExportError::Shutdown)
        } else {
            if batch.write_to(writer) {
                let records = writer.take_records();
                self.with_state(|state| state.batches.push(records));
            }
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) -> ExportResult {
        self.with_state(|state| state.shutdown = true);
        Ok(())
    }
}
