//! Per-endpoint transport dispatch.
//!
//! One dispatch call sends one report body to one endpoint and reports
//! the outcome; nothing here decides a report's fate. Mail goes through
//! a fresh SMTP session per attempt, web endpoints get a single
//! status-confirmed POST.

use std::{sync::Arc, time::Duration};

use rapport_common::report::AggregateReport;
use rapport_smtp::{Attachment, MessageBuilder, SessionConfig, SmtpSession};
use tracing::{debug, info, warn};

use crate::{
    config::DeliveryConfig,
    endpoint::{DeliveryEndpoint, EndpointKind},
    error::DeliveryError,
    planner,
    signer::DkimSigner,
};

/// Result of one delivery attempt. Ephemeral: consumed by the scheduler
/// immediately, never persisted.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub endpoint: DeliveryEndpoint,
    pub success: bool,
    pub failure: Option<DeliveryError>,
}

impl DeliveryOutcome {
    fn succeeded(endpoint: DeliveryEndpoint) -> Self {
        Self {
            endpoint,
            success: true,
            failure: None,
        }
    }

    fn failed(endpoint: DeliveryEndpoint, error: DeliveryError) -> Self {
        Self {
            endpoint,
            success: false,
            failure: Some(error),
        }
    }

    /// `true` when the failure means the owning report must be deleted.
    #[must_use]
    pub fn is_permanent_failure(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(DeliveryError::is_permanent)
    }
}

/// Per-report dispatch bookkeeping: the success count that decides
/// deletion, and whether the carbon copy has been resolved yet.
#[derive(Debug, Default)]
pub struct DispatchState {
    /// Successful endpoint deliveries for this report so far.
    pub sent: u32,
    cc_resolved: bool,
}

/// Sends report bodies to individual endpoints.
pub struct TransportDispatcher {
    config: Arc<DeliveryConfig>,
    session_config: SessionConfig,
    signer: Option<DkimSigner>,
    http: reqwest::Client,
}

impl TransportDispatcher {
    /// Build a dispatcher for one engine configuration.
    ///
    /// # Errors
    /// Returns [`DeliveryError::Config`] when the HTTP client cannot be
    /// constructed.
    pub fn new(
        config: Arc<DeliveryConfig>,
        signer: Option<DkimSigner>,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| DeliveryError::Config(e.to_string()))?;
        let session_config = config.session.clone();

        Ok(Self {
            config,
            session_config,
            signer,
            http,
        })
    }

    /// Attempt delivery of `body` to one endpoint.
    pub async fn dispatch(
        &self,
        endpoint: &DeliveryEndpoint,
        body: &[u8],
        report: &AggregateReport,
        state: &mut DispatchState,
    ) -> DeliveryOutcome {
        let result = match endpoint.kind {
            EndpointKind::Mail => self.dispatch_mail(endpoint, body, report, state).await,
            EndpointKind::Web => self.dispatch_web(endpoint, body).await,
        };

        match result {
            Ok(()) => {
                state.sent += 1;
                info!(
                    report = %report.id,
                    endpoint = %endpoint.address,
                    sent = state.sent,
                    "delivery succeeded"
                );
                DeliveryOutcome::succeeded(endpoint.clone())
            }
            Err(error) => {
                warn!(
                    report = %report.id,
                    endpoint = %endpoint.address,
                    %error,
                    "delivery attempt failed"
                );
                DeliveryOutcome::failed(endpoint.clone(), error)
            }
        }
    }

    /// Best-effort oversize notice, mail endpoints only. The caller
    /// deletes the report whatever this returns.
    pub async fn send_oversize_notice(
        &self,
        endpoint: &DeliveryEndpoint,
        report: &AggregateReport,
        compressed_len: u64,
    ) {
        if endpoint.kind != EndpointKind::Mail {
            debug!(endpoint = %endpoint.address, "oversize notices are mail-only, skipping");
            return;
        }

        let message = MessageBuilder::new()
            .from(&self.config.from_address)
            .to(&endpoint.address)
            .subject(format!(
                "Report Domain: {} Submitter: {} Report-ID: <{}>",
                report.source_domain, self.config.org_name, report.id
            ))
            .message_id(format!(
                "{}.notice@{}",
                report.id, self.session_config.helo_domain
            ))
            .body(planner::oversize_notice(report, compressed_len))
            .build();

        let result = self.send_message(&endpoint.address, None, &message).await;
        match result {
            Ok(()) => info!(
                report = %report.id,
                endpoint = %endpoint.address,
                "oversize notice sent"
            ),
            Err(error) => warn!(
                report = %report.id,
                endpoint = %endpoint.address,
                %error,
                "oversize notice failed"
            ),
        }
    }

    async fn dispatch_mail(
        &self,
        endpoint: &DeliveryEndpoint,
        body: &[u8],
        report: &AggregateReport,
        state: &mut DispatchState,
    ) -> Result<(), DeliveryError> {
        // A signing failure aborts this attempt before any connection is
        // opened; other endpoints and reports are untouched.
        let message = self.build_report_message(endpoint, body, report)?;

        // The carbon copy rides along with the first mail attempt only.
        let cc = if state.cc_resolved {
            None
        } else {
            state.cc_resolved = true;
            self.config.carbon_copy()
        };

        self.send_message(&endpoint.address, cc, &message).await
    }

    /// Run one full session: connect, submit, and always terminate.
    async fn send_message(
        &self,
        to: &str,
        cc: Option<&str>,
        message: &str,
    ) -> Result<(), DeliveryError> {
        let mut session = SmtpSession::connect(&self.config.smtp_host, &self.session_config).await?;
        let result = self.submit(&mut session, to, cc, message).await;
        session.quit().await;
        result
    }

    async fn submit(
        &self,
        session: &mut SmtpSession,
        to: &str,
        cc: Option<&str>,
        message: &str,
    ) -> Result<(), DeliveryError> {
        session.mail_from(&self.config.from_address).await?;

        // Carbon copy goes first and is best-effort: a refusal must not
        // cost the primary recipient its delivery.
        if let Some(cc) = cc
            && let Err(error) = session.rcpt_to(cc).await
        {
            warn!(cc, %error, "carbon-copy recipient refused");
        }

        session.rcpt_to(to).await?;
        let accepted = session.data(message).await?;
        debug!(endpoint = to, reply = %accepted, "message body accepted");
        Ok(())
    }

    async fn dispatch_web(
        &self,
        endpoint: &DeliveryEndpoint,
        body: &[u8],
    ) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(&endpoint.address)
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| DeliveryError::Connect(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Transient(format!(
                "endpoint returned HTTP {status}"
            )))
        }
    }

    fn build_report_message(
        &self,
        endpoint: &DeliveryEndpoint,
        body: &[u8],
        report: &AggregateReport,
    ) -> Result<String, DeliveryError> {
        let filename = format!(
            "{}!{}!{}.xml.gz",
            self.config.org_name, report.source_domain, report.id
        );
        let mut message = MessageBuilder::new()
            .from(&self.config.from_address)
            .to(&endpoint.address)
            .subject(format!(
                "Report Domain: {} Submitter: {} Report-ID: <{}>",
                report.source_domain, self.config.org_name, report.id
            ))
            .message_id(format!("{}@{}", report.id, self.session_config.helo_domain))
            .body(format!(
                "This is an aggregate authentication report for {}.\n",
                report.source_domain
            ))
            .attachment(Attachment {
                filename,
                content_type: "application/gzip".to_string(),
                data: body.to_vec(),
            })
            .build();

        if let Some(signer) = &self.signer {
            let header = signer
                .sign(&message)
                .map_err(|e| DeliveryError::Signing(e.to_string()))?;
            message = format!("{header}\r\n{message}");
        }

        Ok(message)
    }
}
