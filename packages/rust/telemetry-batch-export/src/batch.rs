//! Batches and the writer protocol used to serialize them.
//!
//! A [`Batch`] borrows a run of records taken off the queue for one export
//! cycle. It cannot outlive that cycle: the worker reuses the underlying
//! storage for the next batch as soon as the export call returns.
//!
//! [`Batch::write_to`] walks the records and drives a [`BatchWriter`] through
//! a fixed sequence:
//!
//! ```text
//! begin_batch(resource)
//!   begin_instrumentation_scope(scope A)  write(r1) write(r3) ...  end_instrumentation_scope()
//!   begin_instrumentation_scope(scope B)  write(r2) ...            end_instrumentation_scope()
//! end_batch()
//! ```
//!
//! Records are grouped by scope name, so a scope never appears twice in one
//! batch even when its records are interleaved with others in the queue.

use crate::record::{InstrumentationScope, TelemetryRecord};
use indexmap::IndexMap;
use opentelemetry_sdk::Resource;

/// Receives a batch one scope group at a time.
///
/// Writers are owned by a single export worker and always driven through
/// `&mut`, so implementations can keep reusable buffers without locking.
pub trait BatchWriter {
    /// Called exactly once, before anything else, for every non-empty batch.
    fn begin_batch(&mut self, resource: &Resource);

    /// Opens the group for `scope`; only records of this scope follow until
    /// [`end_instrumentation_scope`](BatchWriter::end_instrumentation_scope).
    fn begin_instrumentation_scope(&mut self, scope: &InstrumentationScope);

    fn write(&mut self, record: &TelemetryRecord);

    fn end_instrumentation_scope(&mut self);

    /// Called exactly once, after the last scope group is closed.
    fn end_batch(&mut self);
}

/// A transient view over the records of one export cycle.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    records: &'a [TelemetryRecord],
    resource: &'a Resource,
}

impl<'a> Batch<'a> {
    pub fn new(records: &'a [TelemetryRecord], resource: &'a Resource) -> Self {
        Self { records, resource }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn resource(&self) -> &'a Resource {
        self.resource
    }

    /// Records in queue order.
    pub fn records(&self) -> &'a [TelemetryRecord] {
        self.records
    }

    /// Drives `writer` through the full batch sequence.
    ///
    /// Returns `false` without calling the writer when the batch is empty;
    /// callers treat that as "nothing was sent".
    pub fn write_to<W>(&self, writer: &mut W) -> bool
    where
        W: BatchWriter + ?Sized,
    {
        if self.records.is_empty() {
            return false;
        }

        // First scope seen under a name represents the whole group
        let mut groups: IndexMap<&str, (&InstrumentationScope, Vec<&TelemetryRecord>)> =
            IndexMap::new();
        for record in self.records {
            let scope = record.scope();
            groups
                .entry(scope.name())
                .or_insert_with(|| (scope, Vec::new()))
                .1
                .push(record);
        }

        writer.begin_batch(self.resource);
        for (scope, records) in groups.values() {
            writer.begin_instrumentation_scope(scope);
            for record in records {
                writer.write(record);
            }
            writer.end_instrumentation_scope();
        }
        writer.end_batch();

        true
    }
}
