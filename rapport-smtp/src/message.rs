//! MIME message builder for report mails and operator notices.

use base64::{Engine as _, engine::general_purpose::STANDARD};

/// A message attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Filename used in the MIME headers.
    pub filename: String,
    /// MIME content type (e.g. `application/gzip`).
    pub content_type: String,
    /// Raw attachment bytes, base64-encoded at build time.
    pub data: Vec<u8>,
}

/// Builder for a complete RFC 5322 message.
///
/// Produces a plain text message, or a `multipart/mixed` message when an
/// attachment is present. Output uses CRLF line endings throughout so it
/// can be handed to a session body submission unchanged.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    message_id: Option<String>,
    body: Option<String>,
    attachment: Option<Attachment>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Sets the Subject header.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the Message-ID header (angle brackets added at build time).
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the text body.
    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    /// Attaches a file.
    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Render the message.
    #[must_use]
    pub fn build(&self) -> String {
        let mut out = String::new();

        push_header(&mut out, "Date", &chrono::Utc::now().to_rfc2822());
        if let Some(from) = &self.from {
            push_header(&mut out, "From", from);
        }
        if !self.to.is_empty() {
            push_header(&mut out, "To", &self.to.join(", "));
        }
        if let Some(subject) = &self.subject {
            push_header(&mut out, "Subject", subject);
        }
        if let Some(id) = &self.message_id {
            push_header(&mut out, "Message-ID", &format!("<{id}>"));
        }
        push_header(&mut out, "MIME-Version", "1.0");

        let body = self.body.as_deref().unwrap_or_default();

        if let Some(attachment) = &self.attachment {
            let boundary = self.boundary();
            push_header(
                &mut out,
                "Content-Type",
                &format!("multipart/mixed; boundary=\"{boundary}\""),
            );
            out.push_str("\r\n");

            out.push_str(&format!("--{boundary}\r\n"));
            push_header(&mut out, "Content-Type", "text/plain; charset=utf-8");
            out.push_str("\r\n");
            out.push_str(&crlf(body));
            out.push_str("\r\n");

            out.push_str(&format!("--{boundary}\r\n"));
            push_header(&mut out, "Content-Type", &attachment.content_type);
            push_header(&mut out, "Content-Transfer-Encoding", "base64");
            push_header(
                &mut out,
                "Content-Disposition",
                &format!("attachment; filename=\"{}\"", attachment.filename),
            );
            out.push_str("\r\n");
            out.push_str(&wrap_base64(&STANDARD.encode(&attachment.data)));
            out.push_str(&format!("--{boundary}--\r\n"));
        } else {
            push_header(&mut out, "Content-Type", "text/plain; charset=utf-8");
            out.push_str("\r\n");
            out.push_str(&crlf(body));
        }

        out
    }

    fn boundary(&self) -> String {
        let tag: String = self
            .message_id
            .as_deref()
            .unwrap_or("part")
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        format!("=_rapport_{tag}")
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

fn crlf(text: &str) -> String {
    let mut normalized = text.replace("\r\n", "\n").replace('\n', "\r\n");
    if !normalized.is_empty() && !normalized.ends_with("\r\n") {
        normalized.push_str("\r\n");
    }
    normalized
}

/// Base64 bodies are wrapped at 76 columns per MIME.
fn wrap_base64(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);
    let bytes = encoded.as_bytes();
    for chunk in bytes.chunks(76) {
        // base64 output is always ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_has_expected_headers() {
        let message = MessageBuilder::new()
            .from("reports@example.org")
            .to("agg@example.com")
            .subject("Report Domain: example.com")
            .message_id("r-1@example.org")
            .body("hello")
            .build();

        assert!(message.contains("From: reports@example.org\r\n"));
        assert!(message.contains("To: agg@example.com\r\n"));
        assert!(message.contains("Subject: Report Domain: example.com\r\n"));
        assert!(message.contains("Message-ID: <r-1@example.org>\r\n"));
        assert!(message.contains("Content-Type: text/plain"));
        assert!(message.ends_with("hello\r\n"));
    }

    #[test]
    fn attachment_produces_multipart_with_base64() {
        let message = MessageBuilder::new()
            .from("reports@example.org")
            .to("agg@example.com")
            .body("report attached")
            .attachment(Attachment {
                filename: "report.xml.gz".to_string(),
                content_type: "application/gzip".to_string(),
                data: vec![0x1f, 0x8b, 0x08, 0x00],
            })
            .build();

        assert!(message.contains("multipart/mixed"));
        assert!(message.contains("Content-Transfer-Encoding: base64"));
        assert!(message.contains("filename=\"report.xml.gz\""));
        assert!(message.contains(&STANDARD.encode([0x1f, 0x8b, 0x08, 0x00])));
        assert!(message.contains("--\r\n"));
    }

    #[test]
    fn base64_wraps_at_76_columns() {
        let wrapped = wrap_base64(&"A".repeat(100));
        let mut lines = wrapped.lines();
        assert_eq!(lines.next().unwrap().len(), 76);
        assert_eq!(lines.next().unwrap().len(), 24);
    }

    #[test]
    fn multiple_recipients_joined_in_to_header() {
        let message = MessageBuilder::new()
            .to("a@example.com")
            .to("b@example.com")
            .build();
        assert!(message.contains("To: a@example.com, b@example.com\r\n"));
    }
}
