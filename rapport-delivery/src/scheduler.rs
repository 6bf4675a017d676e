//! The batch run loop.
//!
//! Strictly sequential: one report is fully processed, all its endpoints
//! in order, before the next begins. The only asynchronous element is
//! the per-report deadline, a timeout scope around the whole report
//! future — dropping the future disarms it on every exit path. Failures
//! are classified and absorbed at the per-report boundary; only an
//! unretrievable queue ends the run.

use std::{sync::Arc, time::Duration};

use rapport_common::report::AggregateReport;
use tracing::{debug, error, info, warn};

use crate::{
    accountant::ErrorAccountant,
    config::DeliveryConfig,
    dispatcher::{DispatchState, TransportDispatcher},
    endpoint::EndpointKind,
    error::DeliveryError,
    planner::{self, SizeCheck},
    queue::ReportQueue,
};

/// What happened to one report during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDisposition {
    /// At least one endpoint accepted the report; it was deleted.
    Delivered,
    /// The report was deleted without delivery (unroutable, oversized,
    /// permanently rejected, or over the error threshold).
    Deleted,
    /// The failure was recorded; the report stays queued for the next
    /// run.
    Deferred,
}

/// Tallies for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub delivered: usize,
    pub deleted: usize,
    pub deferred: usize,
}

impl RunSummary {
    fn tally(&mut self, disposition: ReportDisposition) {
        self.processed += 1;
        match disposition {
            ReportDisposition::Delivered => self.delivered += 1,
            ReportDisposition::Deleted => self.deleted += 1,
            ReportDisposition::Deferred => self.deferred += 1,
        }
    }
}

/// Drives one delivery run over the queued reports.
pub struct BatchScheduler {
    config: Arc<DeliveryConfig>,
    queue: Arc<dyn ReportQueue>,
    dispatcher: TransportDispatcher,
    accountant: ErrorAccountant,
}

impl BatchScheduler {
    #[must_use]
    pub fn new(
        config: Arc<DeliveryConfig>,
        queue: Arc<dyn ReportQueue>,
        dispatcher: TransportDispatcher,
    ) -> Self {
        let accountant = ErrorAccountant::new(queue.clone());
        Self {
            config,
            queue,
            dispatcher,
            accountant,
        }
    }

    /// Process every queued report once.
    ///
    /// # Errors
    /// Returns [`DeliveryError::Queue`] only when the pending reports
    /// cannot be retrieved at all; per-report failures never end the
    /// run.
    pub async fn run(&self) -> Result<RunSummary, DeliveryError> {
        let reports = self
            .queue
            .retrieve_todo()
            .await
            .map_err(|e| DeliveryError::Queue(e.to_string()))?;

        info!(pending = reports.len(), "delivery run starting");
        let mut summary = RunSummary::default();

        for report in &reports {
            let deadline = Duration::from_secs(self.config.per_report_timeout_secs);
            let disposition = match tokio::time::timeout(deadline, self.process_report(report))
                .await
            {
                Ok(Ok(disposition)) => disposition,
                Ok(Err(error)) => {
                    // Caught at the per-report boundary; the run goes on.
                    error!(report = %report.id, %error, "report processing failed");
                    self.defer_with_error(report, &error.to_string()).await
                }
                Err(_) => {
                    let error = DeliveryError::Timeout(self.config.per_report_timeout_secs);
                    warn!(report = %report.id, "per-report deadline elapsed");
                    self.defer_with_error(report, &error.to_string()).await
                }
            };
            summary.tally(disposition);

            // Deliberate throttling between batches; the pause never
            // precedes the first report.
            if summary.processed % self.config.batch_size == 0 {
                debug!(
                    processed = summary.processed,
                    delay_secs = self.config.inter_batch_delay_secs,
                    "batch complete, pausing"
                );
                tokio::time::sleep(Duration::from_secs(self.config.inter_batch_delay_secs)).await;
            }
        }

        info!(
            processed = summary.processed,
            delivered = summary.delivered,
            deleted = summary.deleted,
            deferred = summary.deferred,
            "delivery run finished"
        );
        Ok(summary)
    }

    /// Process one report end to end: resolve, size-check, dispatch to
    /// each endpoint, and settle its fate.
    async fn process_report(
        &self,
        report: &AggregateReport,
    ) -> Result<ReportDisposition, DeliveryError> {
        let endpoints = match planner::resolve_endpoints(report) {
            Ok(endpoints) => endpoints,
            Err(DeliveryError::Unroutable) => {
                // No declared recipient means permanently undeliverable.
                warn!(
                    report = %report.id,
                    rua = %report.policy.rua,
                    "no routable endpoint, deleting report"
                );
                self.accountant.delete_report(&report.id).await?;
                return Ok(ReportDisposition::Deleted);
            }
            Err(error) => return Err(error),
        };

        // Compress once; the byte length is reused for every endpoint.
        let compressed = match planner::compress(&report.xml) {
            Ok(bytes) => bytes,
            Err(error) => {
                return Ok(self
                    .defer_with_error(report, &format!("compression failed: {error}"))
                    .await);
            }
        };
        let compressed_len = compressed.len() as u64;

        let (fitting, oversized): (Vec<_>, Vec<_>) = endpoints
            .into_iter()
            .partition(|endpoint| planner::check_size(endpoint, compressed_len) == SizeCheck::Fits);

        if fitting.is_empty() {
            // Every endpoint refused the size. Best-effort notice to the
            // mail endpoints, then delete unconditionally: deletion does
            // not wait on the notice landing.
            warn!(
                report = %report.id,
                compressed_bytes = compressed_len,
                "report exceeds every endpoint size cap"
            );
            for endpoint in oversized
                .iter()
                .filter(|endpoint| endpoint.kind == EndpointKind::Mail)
            {
                self.dispatcher
                    .send_oversize_notice(endpoint, report, compressed_len)
                    .await;
            }
            self.accountant.delete_report(&report.id).await?;
            return Ok(ReportDisposition::Deleted);
        }

        let mut state = DispatchState::default();
        let mut failures = Vec::new();

        for endpoint in &fitting {
            let outcome = self
                .dispatcher
                .dispatch(endpoint, &compressed, report, &mut state)
                .await;

            if outcome.is_permanent_failure() {
                // A terminally invalid recipient address: delete now,
                // never retry.
                warn!(
                    report = %report.id,
                    endpoint = %outcome.endpoint.address,
                    "permanent rejection, deleting report"
                );
                self.accountant.delete_report(&report.id).await?;
                return Ok(ReportDisposition::Deleted);
            }
            if let Some(failure) = outcome.failure {
                failures.push((outcome.endpoint.address, failure));
            }
        }

        if state.sent > 0 {
            self.accountant.delete_report(&report.id).await?;
            return Ok(ReportDisposition::Delivered);
        }

        // Signing failures abort their attempt without leaving a mark on
        // the report's error trail.
        let recordable: Vec<String> = failures
            .iter()
            .filter(|(_, failure)| !matches!(failure, DeliveryError::Signing(_)))
            .map(|(address, failure)| format!("{address}: {failure}"))
            .collect();
        if recordable.is_empty() {
            warn!(
                report = %report.id,
                "every attempt aborted before transport, leaving report queued"
            );
            return Ok(ReportDisposition::Deferred);
        }

        Ok(self.defer_with_error(report, &recordable.join("; ")).await)
    }

    /// Record a failure against the report and apply the threshold.
    /// Queue trouble while recording is logged, never escalated.
    async fn defer_with_error(
        &self,
        report: &AggregateReport,
        message: &str,
    ) -> ReportDisposition {
        let count = match self.accountant.record_error(&report.id, message).await {
            Ok(count) => count,
            Err(error) => {
                error!(report = %report.id, %error, "failed to record delivery error");
                return ReportDisposition::Deferred;
            }
        };

        match self.accountant.enforce_threshold(&report.id, count).await {
            Ok(true) => ReportDisposition::Deleted,
            Ok(false) => ReportDisposition::Deferred,
            Err(error) => {
                error!(report = %report.id, %error, "failed to enforce error threshold");
                ReportDisposition::Deferred
            }
        }
    }
}
