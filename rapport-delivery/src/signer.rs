//! DKIM message signing (ed25519-sha256, RFC 8463).
//!
//! Signing is optional. When configured, a failed key load is fatal at
//! startup, but a failed signature at delivery time aborts only the
//! attempt it belongs to.

use std::{io, path::Path, path::PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ed25519_dalek::{Signer as _, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// The only signing algorithm this engine supports.
pub const ALGORITHM: &str = "ed25519-sha256";

/// Headers covered by the signature, in signing order, when present.
const SIGNED_HEADERS: [&str; 4] = ["from", "to", "subject", "date"];

/// Errors raised while loading a key or signing a message.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("cannot read signing key {path}: {source}")]
    KeyFile { path: PathBuf, source: io::Error },

    #[error("invalid signing key: {0}")]
    KeyFormat(String),

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("message not signable: {0}")]
    Message(String),
}

/// Canonicalization method applied to headers and body alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Canonicalization {
    Simple,
    #[default]
    Relaxed,
}

impl std::fmt::Display for Canonicalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        })
    }
}

/// Signs outgoing report messages with a domain key.
pub struct DkimSigner {
    key: SigningKey,
    domain: String,
    selector: String,
    canonicalization: Canonicalization,
}

impl DkimSigner {
    #[must_use]
    pub fn new(
        key: SigningKey,
        domain: impl Into<String>,
        selector: impl Into<String>,
        canonicalization: Canonicalization,
    ) -> Self {
        Self {
            key,
            domain: domain.into(),
            selector: selector.into(),
            canonicalization,
        }
    }

    /// Load the signing key from a file holding the base64-encoded
    /// 32-byte ed25519 seed.
    ///
    /// # Errors
    /// Returns [`SignerError::KeyFile`] or [`SignerError::KeyFormat`];
    /// both are fatal at startup when signing is configured.
    pub fn from_key_file(
        path: &Path,
        domain: impl Into<String>,
        selector: impl Into<String>,
        canonicalization: Canonicalization,
    ) -> Result<Self, SignerError> {
        let encoded = std::fs::read_to_string(path).map_err(|source| SignerError::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SignerError::KeyFormat(format!("key is not valid base64: {e}")))?;
        let seed: [u8; 32] = decoded
            .try_into()
            .map_err(|_| SignerError::KeyFormat("key must be a 32-byte seed".to_string()))?;

        Ok(Self::new(
            SigningKey::from_bytes(&seed),
            domain,
            selector,
            canonicalization,
        ))
    }

    /// Build a signer from the engine configuration.
    ///
    /// # Errors
    /// Returns [`SignerError::UnsupportedAlgorithm`] for anything but
    /// `ed25519-sha256`, and key errors per [`Self::from_key_file`].
    /// All of these are fatal at startup.
    pub fn from_config(config: &crate::config::DkimConfig) -> Result<Self, SignerError> {
        if config.algorithm != ALGORITHM {
            return Err(SignerError::UnsupportedAlgorithm(config.algorithm.clone()));
        }
        Self::from_key_file(
            &config.key_file,
            config.domain.clone(),
            config.selector.clone(),
            config.canonicalization,
        )
    }

    /// Sign a rendered message, returning the `DKIM-Signature` header to
    /// prepend to it.
    ///
    /// # Errors
    /// Returns [`SignerError::Message`] for a message without a header
    /// block or without a From header.
    pub fn sign(&self, message: &str) -> Result<String, SignerError> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.sign_at(message, timestamp)
    }

    fn sign_at(&self, message: &str, timestamp: u64) -> Result<String, SignerError> {
        let (headers, body) = split_message(message)?;

        let selected: Vec<&Header> = SIGNED_HEADERS
            .iter()
            .filter_map(|name| headers.iter().find(|header| header.lower_name == *name))
            .collect();
        if !selected.iter().any(|header| header.lower_name == "from") {
            return Err(SignerError::Message("no From header".to_string()));
        }

        let h_list = selected
            .iter()
            .map(|header| header.lower_name.as_str())
            .collect::<Vec<_>>()
            .join(":");
        let body_hash = STANDARD.encode(Sha256::digest(
            canonicalize_body(body, self.canonicalization).as_bytes(),
        ));

        let mut field = self.signature_field(&h_list, &body_hash, timestamp);

        let mut data = String::new();
        for header in &selected {
            data.push_str(&canonicalize_header(header, self.canonicalization));
            data.push_str("\r\n");
        }
        // The signature header itself is hashed with an empty b= tag and
        // no trailing CRLF.
        data.push_str(&canonicalize_header(
            &Header::new("DKIM-Signature", &field),
            self.canonicalization,
        ));

        let signature = self.key.sign(Sha256::digest(data.as_bytes()).as_slice());
        field.push_str(&STANDARD.encode(signature.to_bytes()));

        Ok(format!("DKIM-Signature: {field}"))
    }

    fn signature_field(&self, h_list: &str, body_hash: &str, timestamp: u64) -> String {
        format!(
            "v=1; a={ALGORITHM}; c={c}/{c}; d={d}; s={s}; t={timestamp}; h={h_list}; bh={body_hash}; b=",
            c = self.canonicalization,
            d = self.domain,
            s = self.selector,
        )
    }
}

#[derive(Debug)]
struct Header {
    lower_name: String,
    raw: String,
    value: String,
}

impl Header {
    fn new(name: &str, value: &str) -> Self {
        Self {
            lower_name: name.to_ascii_lowercase(),
            raw: format!("{name}: {value}"),
            value: value.to_string(),
        }
    }
}

fn split_message(message: &str) -> Result<(Vec<Header>, &str), SignerError> {
    let normalized_break = message
        .find("\r\n\r\n")
        .map(|at| (at, at + 4))
        .or_else(|| message.find("\n\n").map(|at| (at, at + 2)))
        .ok_or_else(|| SignerError::Message("no header/body separator".to_string()))?;

    let header_block = &message[..normalized_break.0];
    let body = &message[normalized_break.1..];

    let mut headers: Vec<Header> = Vec::new();
    for line in header_block.replace("\r\n", "\n").split('\n') {
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation of the previous header.
            if let Some(last) = headers.last_mut() {
                last.raw.push_str("\r\n");
                last.raw.push_str(line);
                last.value.push(' ');
                last.value.push_str(line.trim());
            }
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.push(Header {
            lower_name: name.trim().to_ascii_lowercase(),
            raw: line.to_string(),
            value: value.trim().to_string(),
        });
    }

    Ok((headers, body))
}

fn canonicalize_header(header: &Header, method: Canonicalization) -> String {
    match method {
        Canonicalization::Simple => header.raw.clone(),
        Canonicalization::Relaxed => {
            let value = header
                .value
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            format!("{}:{}", header.lower_name, value)
        }
    }
}

fn canonicalize_body(body: &str, method: Canonicalization) -> String {
    let normalized = body.replace("\r\n", "\n");
    let mut lines: Vec<String> = normalized
        .split('\n')
        .map(|line| match method {
            Canonicalization::Simple => line.to_string(),
            Canonicalization::Relaxed => line
                .split([' ', '\t'])
                .filter(|word| !word.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        })
        .collect();

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    if lines.is_empty() {
        return match method {
            Canonicalization::Simple => "\r\n".to_string(),
            Canonicalization::Relaxed => String::new(),
        };
    }

    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    out
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::Verifier as _;

    use super::*;

    const MESSAGE: &str = "From: reports@example.org\r\nTo: agg@example.com\r\n\
                           Subject: Report Domain: example.com\r\nDate: Thu, 01 Jan 2026 00:00:00 +0000\r\n\
                           \r\nreport body\r\n";

    fn signer() -> DkimSigner {
        DkimSigner::new(
            SigningKey::from_bytes(&[7u8; 32]),
            "example.org",
            "rapport",
            Canonicalization::Relaxed,
        )
    }

    #[test]
    fn produces_verifiable_signature() {
        let signer = signer();
        let header = signer.sign_at(MESSAGE, 1_700_000_000).unwrap();
        assert!(header.starts_with("DKIM-Signature: v=1; a=ed25519-sha256; c=relaxed/relaxed;"));
        assert!(header.contains("d=example.org"));
        assert!(header.contains("s=rapport"));
        assert!(header.contains("h=from:to:subject:date"));

        // Rebuild the signed data and verify against the public key.
        let signature_b64 = header.rsplit_once("; b=").unwrap().1;
        let signature = ed25519_dalek::Signature::from_bytes(
            &STANDARD
                .decode(signature_b64)
                .unwrap()
                .try_into()
                .unwrap(),
        );

        let (headers, _) = split_message(MESSAGE).unwrap();
        let body_hash = STANDARD.encode(Sha256::digest(
            canonicalize_body("report body\r\n", Canonicalization::Relaxed).as_bytes(),
        ));
        let field = signer.signature_field("from:to:subject:date", &body_hash, 1_700_000_000);
        let mut data = String::new();
        for header in &headers {
            data.push_str(&canonicalize_header(header, Canonicalization::Relaxed));
            data.push_str("\r\n");
        }
        data.push_str(&canonicalize_header(
            &Header::new("DKIM-Signature", &field),
            Canonicalization::Relaxed,
        ));

        signer
            .key
            .verifying_key()
            .verify(Sha256::digest(data.as_bytes()).as_slice(), &signature)
            .unwrap();
    }

    #[test]
    fn refuses_message_without_from() {
        let result = signer().sign_at("To: x@y.z\r\n\r\nbody", 0);
        assert!(matches!(result, Err(SignerError::Message(_))));
    }

    #[test]
    fn refuses_message_without_body_separator() {
        let result = signer().sign_at("From: a@b.c", 0);
        assert!(matches!(result, Err(SignerError::Message(_))));
    }

    #[test]
    fn relaxed_header_canonicalization_collapses_whitespace() {
        let header = Header::new("Subject", "a  report\t here");
        assert_eq!(
            canonicalize_header(&header, Canonicalization::Relaxed),
            "subject:a report here"
        );
    }

    #[test]
    fn relaxed_body_strips_trailing_blank_lines() {
        assert_eq!(
            canonicalize_body("one  two \r\n\r\n\r\n", Canonicalization::Relaxed),
            "one two\r\n"
        );
        assert_eq!(canonicalize_body("", Canonicalization::Relaxed), "");
        assert_eq!(canonicalize_body("", Canonicalization::Simple), "\r\n");
    }

    #[test]
    fn loads_key_from_base64_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.key");
        std::fs::write(&path, STANDARD.encode([7u8; 32])).unwrap();

        let signer =
            DkimSigner::from_key_file(&path, "example.org", "rapport", Canonicalization::Relaxed)
                .unwrap();
        assert!(signer.sign(MESSAGE).is_ok());
    }

    #[test]
    fn rejects_malformed_key_files() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.key");
        assert!(matches!(
            DkimSigner::from_key_file(&missing, "d", "s", Canonicalization::Relaxed),
            Err(SignerError::KeyFile { .. })
        ));

        let short = dir.path().join("short.key");
        std::fs::write(&short, STANDARD.encode([1u8; 16])).unwrap();
        assert!(matches!(
            DkimSigner::from_key_file(&short, "d", "s", Canonicalization::Relaxed),
            Err(SignerError::KeyFormat(_))
        ));

        let garbage = dir.path().join("garbage.key");
        std::fs::write(&garbage, "not base64 at all!!!").unwrap();
        assert!(matches!(
            DkimSigner::from_key_file(&garbage, "d", "s", Canonicalization::Relaxed),
            Err(SignerError::KeyFormat(_))
        ));
    }
}
