//! SMTP reply parsing and representation.

use crate::error::{Result, SessionError};

/// A single line of an SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    /// The reply code (e.g. 220, 250, 550).
    pub code: u16,
    /// Whether this line terminates the reply.
    pub is_last: bool,
    /// The text following the code.
    pub message: String,
}

/// A complete, possibly multi-line SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The reply code.
    pub code: u16,
    /// All text lines of the reply.
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The reply text, lines joined with newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// `true` for a 2xx reply.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// `true` for a 4xx reply.
    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// `true` for a 5xx reply.
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parse one reply line (without its CRLF).
    ///
    /// # Errors
    /// Returns [`SessionError::Parse`] when the line does not follow the
    /// `NNN[ -]text` shape.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        if line.len() < 3 {
            return Err(SessionError::Parse(format!("reply line too short: '{line}'")));
        }

        let code = line[..3]
            .parse::<u16>()
            .map_err(|_| SessionError::Parse(format!("invalid reply code in '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(_) => {
                return Err(SessionError::Parse(format!(
                    "invalid separator in reply line '{line}'"
                )));
            }
        };

        let message = line.get(4..).unwrap_or_default().to_string();

        Ok(ResponseLine {
            code,
            is_last,
            message,
        })
    }

    /// Try to parse a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it consumed, or `None`
    /// when the buffer does not yet hold a full reply.
    ///
    /// # Errors
    /// Returns [`SessionError::Parse`] for malformed lines or a code
    /// change mid-reply, [`SessionError::Utf8`] for non-UTF-8 data.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let text = std::str::from_utf8(buffer)?;

        let mut consumed = 0;
        let mut first_code = None;
        let mut lines = Vec::new();

        for segment in text.split_inclusive("\r\n") {
            let Some(line) = segment.strip_suffix("\r\n") else {
                // Trailing partial line; wait for more data.
                return Ok(None);
            };
            consumed += segment.len();

            let parsed = Self::parse_line(line)?;
            match first_code {
                None => first_code = Some(parsed.code),
                Some(code) if code != parsed.code => {
                    return Err(SessionError::Parse(format!(
                        "reply code changed mid-reply: {code} then {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
            }
            lines.push(parsed.message);

            if parsed.is_last {
                let Some(code) = first_code else {
                    return Ok(None);
                };
                return Ok(Some((Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_reply() {
        let (response, consumed) = Response::parse(b"250 OK\r\n").unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.lines, vec!["OK"]);
        assert_eq!(consumed, 8);
        assert!(response.is_success());
    }

    #[test]
    fn parses_multi_line_reply() {
        let data = b"250-mail.example.com\r\n250-SIZE 10485760\r\n250 HELP\r\n";
        let (response, consumed) = Response::parse(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "SIZE 10485760", "HELP"]
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn incomplete_reply_needs_more_data() {
        assert!(Response::parse(b"250-mail.example.com\r\n250-SIZ").unwrap().is_none());
        assert!(Response::parse(b"250 OK").unwrap().is_none());
    }

    #[test]
    fn rejects_code_change_mid_reply() {
        assert!(Response::parse(b"250-one\r\n550 two\r\n").is_err());
    }

    #[test]
    fn classifies_code_ranges() {
        assert!(Response::new(421, vec![]).is_transient_error());
        assert!(Response::new(550, vec![]).is_permanent_error());
        assert!(!Response::new(550, vec![]).is_success());
    }

    #[test]
    fn bare_three_digit_line_is_terminal() {
        let line = Response::parse_line("220").unwrap();
        assert!(line.is_last);
        assert_eq!(line.message, "");
    }
}
