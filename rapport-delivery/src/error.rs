//! Typed error handling for delivery operations.
//!
//! Every failure a report can hit is classified here, because the
//! classification decides its fate: permanent failures delete the
//! report, everything else is recorded and retried on a later run.

use rapport_smtp::{Phase, SessionError};
use thiserror::Error;

/// Delivery failure taxonomy.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The report's endpoint list is empty or yields nothing parseable.
    /// A report with no declared recipient is permanently undeliverable.
    #[error("no routable endpoint in rua field")]
    Unroutable,

    /// Neither the encrypted nor the plaintext connection attempt
    /// succeeded.
    #[error("connection failed: {0}")]
    Connect(String),

    /// A retryable rejection or protocol hiccup; recorded and deferred
    /// to the next run.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A 5xx recipient rejection: the address is terminally invalid and
    /// the owning report must be deleted, not retried.
    #[error("permanent rejection: {code} {message}")]
    Permanent { code: u16, message: String },

    /// Message signing failed; aborts only the current attempt.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The per-report deadline elapsed mid-delivery.
    #[error("report processing timed out after {0}s")]
    Timeout(u64),

    /// The queue backend failed.
    #[error("queue error: {0}")]
    Queue(String),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DeliveryError {
    /// `true` when the owning report must be deleted rather than
    /// retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Unroutable | Self::Permanent { .. })
    }

    /// `true` when the failure should be recorded and the report left
    /// queued for the next run.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Transient(_) | Self::Timeout(_) | Self::Signing(_)
        )
    }
}

/// Classify a session failure by protocol step and reply code class.
///
/// Only a 5xx recipient rejection is permanent; every other rejection,
/// timeout or transport failure is worth retrying on a later run.
impl From<SessionError> for DeliveryError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Rejected {
                phase: Phase::RcptTo,
                code,
                message,
            } if (500..600).contains(&code) => Self::Permanent { code, message },

            SessionError::Rejected {
                phase,
                code,
                message,
            } => Self::Transient(format!("{phase} rejected: {code} {message}")),

            SessionError::Io(e) => Self::Connect(e.to_string()),
            SessionError::Tls(message) => Self::Connect(message),
            SessionError::ConnectionClosed => {
                Self::Connect("connection closed unexpectedly".to_string())
            }
            SessionError::Timeout { phase, seconds } => {
                Self::Transient(format!("{phase} timed out after {seconds}s"))
            }
            SessionError::Parse(_) | SessionError::Sequence { .. } => {
                Self::Transient(format!("protocol error: {error}"))
            }
            SessionError::Utf8(e) => Self::Transient(format!("invalid reply encoding: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_recipient_rejection_is_permanent() {
        let error: DeliveryError = SessionError::Rejected {
            phase: Phase::RcptTo,
            code: 550,
            message: "user unknown".to_string(),
        }
        .into();
        assert!(error.is_permanent());
        assert!(!error.is_transient());
        assert_eq!(error.to_string(), "permanent rejection: 550 user unknown");
    }

    #[test]
    fn transient_recipient_rejection_defers() {
        let error: DeliveryError = SessionError::Rejected {
            phase: Phase::RcptTo,
            code: 451,
            message: "try again".to_string(),
        }
        .into();
        assert!(error.is_transient());
        assert!(!error.is_permanent());
    }

    #[test]
    fn permanent_sender_rejection_is_only_transient() {
        // Only the recipient step's 5xx is terminal for the report.
        let error: DeliveryError = SessionError::Rejected {
            phase: Phase::MailFrom,
            code: 550,
            message: "denied".to_string(),
        }
        .into();
        assert!(error.is_transient());
    }

    #[test]
    fn connection_failures_defer() {
        let error: DeliveryError = SessionError::ConnectionClosed.into();
        assert!(matches!(error, DeliveryError::Connect(_)));
        assert!(error.is_transient());
    }

    #[test]
    fn unroutable_is_permanent() {
        assert!(DeliveryError::Unroutable.is_permanent());
    }

    #[test]
    fn signing_failure_defers() {
        assert!(DeliveryError::Signing("no key".to_string()).is_transient());
    }
}
