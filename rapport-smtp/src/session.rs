//! Stepwise SMTP protocol session.
//!
//! One session per delivery attempt. The connect step dials encrypted
//! first and falls back to plaintext; there is no connection reuse. A
//! session value exists only once connected — the disconnected state is
//! the absence of a value — and `quit` is always safe to call, so callers
//! can release the session on every exit path.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    connection::Connection,
    error::{Phase, Result, SessionError},
    response::Response,
};

/// Upper bound on a buffered server reply.
const MAX_REPLY_SIZE: usize = 64 * 1024;

/// Timeout configuration for the individual protocol steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTimeouts {
    /// Timeout for each connection dial (encrypted and plaintext each
    /// get one).
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Timeout for greeting, EHLO, MAIL FROM and RCPT TO exchanges.
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Timeout for the DATA exchange and payload transmission. Longer
    /// than the command timeout to accommodate large reports.
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Timeout for QUIT.
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            command_secs: default_command_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_command_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// Connection parameters for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Domain announced in EHLO.
    #[serde(default = "default_helo_domain")]
    pub helo_domain: String,

    /// Plaintext port, used when the encrypted dial fails.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Implicit-TLS port, tried first.
    #[serde(default = "default_tls_port")]
    pub tls_port: u16,

    /// Accept invalid TLS certificates (tests only).
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Per-step timeouts.
    #[serde(default)]
    pub timeouts: StepTimeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            helo_domain: default_helo_domain(),
            port: default_port(),
            tls_port: default_tls_port(),
            accept_invalid_certs: false,
            timeouts: StepTimeouts::default(),
        }
    }
}

fn default_helo_domain() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    25
}

const fn default_tls_port() -> u16 {
    465
}

/// Protocol position of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Greeting and EHLO accepted.
    Connected,
    /// MAIL FROM accepted.
    SenderAccepted,
    /// At least one RCPT TO accepted.
    RecipientAccepted,
    /// Message body accepted.
    DataSent,
    /// QUIT sent (or the session abandoned).
    Closed,
}

/// An SMTP client session.
pub struct SmtpSession {
    connection: Connection,
    buffer: Vec<u8>,
    state: SessionState,
    timeouts: StepTimeouts,
}

impl SmtpSession {
    /// Connect to `host`: encrypted dial first, plaintext second. Reads
    /// the greeting and performs EHLO, so a returned session is ready
    /// for MAIL FROM.
    ///
    /// # Errors
    /// Returns a connect-phase error when neither dial succeeds, and a
    /// [`SessionError::Rejected`] when the greeting or EHLO is refused.
    pub async fn connect(host: &str, config: &SessionConfig) -> Result<Self> {
        let connection = open_with_fallback(host, config).await?;
        tracing::debug!(
            host,
            encrypted = connection.is_encrypted(),
            "transport established"
        );

        let mut session = Self {
            connection,
            buffer: Vec::new(),
            state: SessionState::Connected,
            timeouts: config.timeouts.clone(),
        };

        let greeting = session
            .read_reply(Phase::Connect, config.timeouts.command_secs)
            .await?;
        if !greeting.is_success() {
            session.quit().await;
            return Err(SessionError::Rejected {
                phase: Phase::Connect,
                code: greeting.code,
                message: greeting.message(),
            });
        }

        let ehlo = session
            .command(&format!("EHLO {}", config.helo_domain), Phase::Ehlo)
            .await?;
        if !ehlo.is_success() {
            session.quit().await;
            return Err(SessionError::Rejected {
                phase: Phase::Ehlo,
                code: ehlo.code,
                message: ehlo.message(),
            });
        }

        Ok(session)
    }

    /// Submit the envelope sender.
    ///
    /// # Errors
    /// Returns [`SessionError::Rejected`] with the server's code when the
    /// sender is refused.
    pub async fn mail_from(&mut self, from: &str) -> Result<()> {
        self.expect_state(Phase::MailFrom, &[SessionState::Connected])?;

        let response = self
            .command(&format!("MAIL FROM:<{from}>"), Phase::MailFrom)
            .await?;
        if !response.is_success() {
            return Err(SessionError::Rejected {
                phase: Phase::MailFrom,
                code: response.code,
                message: response.message(),
            });
        }

        self.state = SessionState::SenderAccepted;
        Ok(())
    }

    /// Submit a recipient. May be called more than once per session.
    ///
    /// # Errors
    /// Returns [`SessionError::Rejected`] with the server's code when the
    /// recipient is refused; a 5xx code means the address is terminally
    /// invalid for the caller's retry policy.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<()> {
        self.expect_state(
            Phase::RcptTo,
            &[SessionState::SenderAccepted, SessionState::RecipientAccepted],
        )?;

        let response = self
            .command(&format!("RCPT TO:<{to}>"), Phase::RcptTo)
            .await?;
        if !response.is_success() {
            return Err(SessionError::Rejected {
                phase: Phase::RcptTo,
                code: response.code,
                message: response.message(),
            });
        }

        self.state = SessionState::RecipientAccepted;
        Ok(())
    }

    /// Submit the message body. Returns the server's acceptance line for
    /// logging.
    ///
    /// # Errors
    /// Returns [`SessionError::Rejected`] when the DATA command or the
    /// payload is refused.
    pub async fn data(&mut self, message: &str) -> Result<String> {
        self.expect_state(Phase::Data, &[SessionState::RecipientAccepted])?;

        let seconds = self.timeouts.data_secs;
        let response = self.exchange("DATA", Phase::Data, seconds).await?;
        if response.code != 354 {
            return Err(SessionError::Rejected {
                phase: Phase::Data,
                code: response.code,
                message: response.message(),
            });
        }

        let payload = dot_stuff(message);
        let accepted = tokio::time::timeout(Duration::from_secs(seconds), async {
            self.connection.send(payload.as_bytes()).await?;
            self.connection.send(b".\r\n").await?;
            self.read_response().await
        })
        .await
        .map_err(|_| SessionError::Timeout {
            phase: Phase::Data,
            seconds,
        })??;

        if !accepted.is_success() {
            return Err(SessionError::Rejected {
                phase: Phase::Data,
                code: accepted.code,
                message: accepted.message(),
            });
        }

        self.state = SessionState::DataSent;
        Ok(accepted.message())
    }

    /// Terminate the session. Best-effort and idempotent; QUIT failures
    /// are logged and swallowed so release is guaranteed on every path.
    pub async fn quit(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        let result = tokio::time::timeout(Duration::from_secs(self.timeouts.quit_secs), async {
            self.connection.send(b"QUIT\r\n").await?;
            self.read_response().await
        })
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(error)) => tracing::debug!(%error, "QUIT failed, closing anyway"),
            Err(_) => tracing::debug!("QUIT timed out, closing anyway"),
        }
    }

    /// Current protocol position.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// `true` when the underlying transport is TLS.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.connection.is_encrypted()
    }

    fn expect_state(&self, attempted: Phase, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::Sequence {
                attempted,
                state: self.state,
            })
        }
    }

    async fn command(&mut self, line: &str, phase: Phase) -> Result<Response> {
        let seconds = self.timeouts.command_secs;
        self.exchange(line, phase, seconds).await
    }

    async fn exchange(&mut self, line: &str, phase: Phase, seconds: u64) -> Result<Response> {
        tokio::time::timeout(Duration::from_secs(seconds), async {
            self.connection.send(format!("{line}\r\n").as_bytes()).await?;
            self.read_response().await
        })
        .await
        .map_err(|_| SessionError::Timeout { phase, seconds })?
    }

    async fn read_reply(&mut self, phase: Phase, seconds: u64) -> Result<Response> {
        tokio::time::timeout(Duration::from_secs(seconds), self.read_response())
            .await
            .map_err(|_| SessionError::Timeout { phase, seconds })?
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(response);
            }
            if self.buffer.len() > MAX_REPLY_SIZE {
                return Err(SessionError::Parse("server reply too large".to_string()));
            }

            let mut chunk = [0u8; 4096];
            let n = self.connection.read(&mut chunk).await?;
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Normalize line endings to CRLF and escape leading dots, ensuring the
/// payload ends with CRLF so the terminating dot sits on its own line.
fn dot_stuff(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 2);
    for line in message.replace("\r\n", "\n").split('\n') {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    // A trailing newline in the input produces one empty line too many.
    if message.ends_with('\n') {
        out.truncate(out.len() - 2);
    }
    out
}

async fn open_with_fallback(host: &str, config: &SessionConfig) -> Result<Connection> {
    let seconds = config.timeouts.connect_secs;
    let dial_timeout = Duration::from_secs(seconds);

    match tokio::time::timeout(
        dial_timeout,
        Connection::open_tls(host, config.tls_port, config.accept_invalid_certs),
    )
    .await
    {
        Ok(Ok(connection)) => return Ok(connection),
        Ok(Err(error)) => {
            tracing::debug!(host, %error, "encrypted dial failed, trying plaintext");
        }
        Err(_) => {
            tracing::debug!(host, "encrypted dial timed out, trying plaintext");
        }
    }

    match tokio::time::timeout(dial_timeout, Connection::open_plain(host, config.port)).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout {
            phase: Phase::Connect,
            seconds,
        }),
    }
}
