//! Error types for the SMTP client session.

use std::{fmt, io};

use thiserror::Error;

use crate::session::SessionState;

/// The protocol step a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Ehlo,
    MailFrom,
    RcptTo,
    Data,
    Quit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Ehlo => "EHLO",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Quit => "QUIT",
        })
    }
}

/// Errors that can occur during an SMTP session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// IO error during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server reply could not be parsed.
    #[error("unparseable server reply: {0}")]
    Parse(String),

    /// The server replied to a step with a non-success code.
    #[error("{phase} rejected: {code} {message}")]
    Rejected {
        phase: Phase,
        code: u16,
        message: String,
    },

    /// The peer closed the connection mid-session.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// A step did not complete within its allotted time.
    #[error("{phase} timed out after {seconds}s")]
    Timeout { phase: Phase, seconds: u64 },

    /// A step was attempted out of protocol order.
    #[error("{attempted} attempted in state {state:?}")]
    Sequence {
        attempted: Phase,
        state: SessionState,
    },

    /// The server reply was not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Specialized `Result` type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
