//! Engine configuration.
//!
//! All process-wide knobs live in one explicit value handed to the
//! components that need it; nothing reads ambient state.

use std::path::{Path, PathBuf};

use rapport_smtp::SessionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signer::Canonicalization;

/// Shipped template value for the carbon-copy address. A configuration
/// that still carries it is treated as having no carbon copy.
pub const CC_PLACEHOLDER: &str = "cc@example.com";

/// Errors loading or validating a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// DKIM signing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkimConfig {
    /// File holding the base64-encoded ed25519 seed.
    pub key_file: PathBuf,
    /// Signing domain (`d=`).
    pub domain: String,
    /// Selector (`s=`).
    pub selector: String,
    /// Signature algorithm; only `ed25519-sha256` is supported.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Canonicalization method for headers and body.
    #[serde(default)]
    pub canonicalization: Canonicalization,
}

fn default_algorithm() -> String {
    crate::signer::ALGORITHM.to_string()
}

/// Delivery engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Reporting organization name, used in subjects and attachment
    /// filenames.
    #[serde(default = "default_org_name")]
    pub org_name: String,

    /// Envelope and header sender for outgoing report mail.
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Optional carbon-copy recipient for every report. Ignored while it
    /// still equals [`CC_PLACEHOLDER`].
    #[serde(default)]
    pub cc_address: Option<String>,

    /// Relay all mail-scheme deliveries go through.
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    /// Session parameters (ports, EHLO domain, per-step timeouts).
    #[serde(default)]
    pub session: SessionConfig,

    /// Reports processed between inter-batch pauses.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches, in seconds.
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_secs: u64,

    /// Hard deadline for one report, endpoints included, in seconds.
    #[serde(default = "default_per_report_timeout")]
    pub per_report_timeout_secs: u64,

    /// Timeout for one web-endpoint request, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// DKIM signing; absent means unsigned mail.
    #[serde(default)]
    pub dkim: Option<DkimConfig>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            org_name: default_org_name(),
            from_address: default_from_address(),
            cc_address: None,
            smtp_host: default_smtp_host(),
            session: SessionConfig::default(),
            batch_size: default_batch_size(),
            inter_batch_delay_secs: default_inter_batch_delay(),
            per_report_timeout_secs: default_per_report_timeout(),
            http_timeout_secs: default_http_timeout(),
            dkim: None,
        }
    }
}

fn default_org_name() -> String {
    "localhost".to_string()
}

fn default_from_address() -> String {
    "postmaster@localhost".to_string()
}

fn default_smtp_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_batch_size() -> usize {
    10
}

const fn default_inter_batch_delay() -> u64 {
    5
}

const fn default_per_report_timeout() -> u64 {
    60
}

const fn default_http_timeout() -> u64 {
    30
}

impl DeliveryConfig {
    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read or parsed,
    /// or fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a zero batch size or an
    /// unsupported signing algorithm.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        if let Some(dkim) = &self.dkim
            && dkim.algorithm != crate::signer::ALGORITHM
        {
            return Err(ConfigError::Invalid(format!(
                "unsupported signing algorithm: {}",
                dkim.algorithm
            )));
        }
        Ok(())
    }

    /// The effective carbon-copy address: configured and not the shipped
    /// placeholder.
    #[must_use]
    pub fn carbon_copy(&self) -> Option<&str> {
        self.cc_address
            .as_deref()
            .filter(|cc| *cc != CC_PLACEHOLDER && !cc.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gets_defaults() {
        let config: DeliveryConfig = toml::from_str("").unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.inter_batch_delay_secs, 5);
        assert_eq!(config.per_report_timeout_secs, 60);
        assert_eq!(config.session.port, 25);
        assert!(config.dkim.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn placeholder_carbon_copy_is_ignored() {
        let mut config = DeliveryConfig::default();
        assert_eq!(config.carbon_copy(), None);

        config.cc_address = Some(CC_PLACEHOLDER.to_string());
        assert_eq!(config.carbon_copy(), None);

        config.cc_address = Some("archive@example.org".to_string());
        assert_eq!(config.carbon_copy(), Some("archive@example.org"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config: DeliveryConfig = toml::from_str("batch_size = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unsupported_signing_algorithm_is_rejected() {
        let config: DeliveryConfig = toml::from_str(
            "[dkim]\nkey_file = \"/tmp/k\"\ndomain = \"example.org\"\n\
             selector = \"rapport\"\nalgorithm = \"rsa-sha256\"\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn parses_nested_session_settings() {
        let config: DeliveryConfig = toml::from_str(
            "smtp_host = \"relay.example.org\"\n[session]\nport = 2525\n\
             [session.timeouts]\ncommand_secs = 5\n",
        )
        .unwrap();
        assert_eq!(config.smtp_host, "relay.example.org");
        assert_eq!(config.session.port, 2525);
        assert_eq!(config.session.timeouts.command_secs, 5);
        assert_eq!(config.session.timeouts.data_secs, 120);
    }
}
