//! SMTP client session used to hand aggregate reports to a mail relay.
//!
//! This crate provides:
//! - A connection layer with a secure-first, plaintext-fallback dial
//! - SMTP reply parsing with code-class helpers
//! - A stepwise protocol session (sender, recipient, body, terminate)
//! - A MIME message builder for the report mail and operator notices

mod connection;
mod error;
mod message;
mod response;
mod session;

pub use connection::Connection;
pub use error::{Phase, SessionError};
pub use message::{Attachment, MessageBuilder};
pub use response::{Response, ResponseLine};
pub use session::{SessionConfig, SessionState, SmtpSession, StepTimeouts};
