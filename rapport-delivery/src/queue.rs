//! Report queue boundary.
//!
//! The durable queue lives outside the engine; this module defines the
//! contract the engine drives it through, plus an in-memory backend used
//! by tests and embedders.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use rapport_common::report::{AggregateReport, ReportId};
use thiserror::Error;

/// Errors surfaced by a queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The referenced report is not in the queue.
    #[error("report not found: {0}")]
    NotFound(ReportId),

    /// Any backend-specific failure.
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// The persisted queue of reports awaiting delivery.
#[async_trait]
pub trait ReportQueue: Send + Sync {
    /// All reports pending delivery, in queue order.
    async fn retrieve_todo(&self) -> Result<Vec<AggregateReport>, QueueError>;

    /// Remove a report. Idempotent: deleting an absent report succeeds.
    async fn delete(&self, id: &ReportId) -> Result<(), QueueError>;

    /// Append to a report's error trail, returning the new total.
    async fn record_error(&self, id: &ReportId, message: &str) -> Result<u32, QueueError>;
}

#[derive(Debug, Default)]
struct Inner {
    pending: Vec<AggregateReport>,
    trails: HashMap<ReportId, Vec<String>>,
    deleted: HashSet<ReportId>,
}

/// In-memory queue backend.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reports(reports: Vec<AggregateReport>) -> Self {
        let queue = Self::new();
        for report in reports {
            queue.push(report);
        }
        queue
    }

    /// Enqueue a report.
    pub fn push(&self, report: AggregateReport) {
        self.lock().pending.push(report);
    }

    /// Identifiers of every report deleted so far.
    #[must_use]
    pub fn deleted(&self) -> Vec<ReportId> {
        self.lock().deleted.iter().cloned().collect()
    }

    /// `true` if the report is still queued.
    #[must_use]
    pub fn contains(&self, id: &ReportId) -> bool {
        self.lock().pending.iter().any(|report| &report.id == id)
    }

    /// The recorded error trail for a report.
    #[must_use]
    pub fn error_trail(&self, id: &ReportId) -> Vec<String> {
        self.lock().trails.get(id).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ReportQueue for MemoryQueue {
    async fn retrieve_todo(&self) -> Result<Vec<AggregateReport>, QueueError> {
        Ok(self.lock().pending.clone())
    }

    async fn delete(&self, id: &ReportId) -> Result<(), QueueError> {
        let mut inner = self.lock();
        inner.pending.retain(|report| &report.id != id);
        inner.deleted.insert(id.clone());
        Ok(())
    }

    async fn record_error(&self, id: &ReportId, message: &str) -> Result<u32, QueueError> {
        let mut inner = self.lock();
        let Some(report) = inner.pending.iter_mut().find(|report| &report.id == id) else {
            return Err(QueueError::NotFound(id.clone()));
        };
        report.error_count += 1;
        let count = report.error_count;
        inner
            .trails
            .entry(id.clone())
            .or_default()
            .push(message.to_string());
        Ok(count)
    }
}
