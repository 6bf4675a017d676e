//! Persistent error accounting and the deletion threshold.
//!
//! Failures accumulate against a report across runs; once the count
//! reaches [`MAX_ERRORS`] the report is abandoned rather than retried
//! forever.

use std::sync::Arc;

use rapport_common::report::ReportId;
use tracing::{debug, error, info};

use crate::{
    error::DeliveryError,
    queue::{QueueError, ReportQueue},
};

/// Recorded errors at which a report is deleted instead of retried.
pub const MAX_ERRORS: u32 = 12;

/// Tracks per-report failure counts against the queue and enforces the
/// deletion threshold.
pub struct ErrorAccountant {
    queue: Arc<dyn ReportQueue>,
}

impl ErrorAccountant {
    #[must_use]
    pub fn new(queue: Arc<dyn ReportQueue>) -> Self {
        Self { queue }
    }

    /// Append to the report's persisted error trail, returning the new
    /// total.
    ///
    /// # Errors
    /// Returns [`DeliveryError::Queue`] when the backend fails.
    pub async fn record_error(
        &self,
        id: &ReportId,
        message: &str,
    ) -> Result<u32, DeliveryError> {
        let count = self
            .queue
            .record_error(id, message)
            .await
            .map_err(|e| DeliveryError::Queue(e.to_string()))?;
        debug!(report = %id, errors = count, "recorded delivery error");
        Ok(count)
    }

    /// Delete the report once its error count reaches the threshold.
    /// Returns `true` when the report was abandoned.
    ///
    /// # Errors
    /// Returns [`DeliveryError::Queue`] when the backend fails.
    pub async fn enforce_threshold(
        &self,
        id: &ReportId,
        count: u32,
    ) -> Result<bool, DeliveryError> {
        if count >= MAX_ERRORS {
            error!(
                report = %id,
                errors = count,
                "error threshold reached, abandoning report"
            );
            self.delete_report(id).await?;
            Ok(true)
        } else {
            debug!(
                report = %id,
                errors = count,
                "report left queued for the next run"
            );
            Ok(false)
        }
    }

    /// Remove the report from the queue. Idempotent.
    ///
    /// # Errors
    /// Returns [`DeliveryError::Queue`] when the backend fails; an
    /// already-deleted report is not a failure.
    pub async fn delete_report(&self, id: &ReportId) -> Result<(), DeliveryError> {
        match self.queue.delete(id).await {
            Ok(()) => {
                info!(report = %id, "report deleted");
                Ok(())
            }
            Err(QueueError::NotFound(_)) => Ok(()),
            Err(e) => Err(DeliveryError::Queue(e.to_string())),
        }
    }
}
