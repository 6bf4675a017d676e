//! Published policy record model.
//!
//! A policy record is the set of tags a domain publishes to describe how
//! authentication failures should be handled and where feedback reports
//! should be sent. The model enforces its invariants on every mutation:
//! fields are private and all writes go through validating setters.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only record version this engine understands.
pub const RECORD_VERSION: &str = "DMARC1";

/// Errors produced while parsing or mutating a policy record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The record does not start with a `v=` tag.
    #[error("record does not begin with a version tag")]
    MissingVersion,

    /// The record names a version other than [`RECORD_VERSION`].
    #[error("unsupported record version: {0}")]
    UnsupportedVersion(String),

    /// A required tag is absent.
    #[error("required tag missing: {0}")]
    MissingTag(&'static str),

    /// A tag carries a value outside its enumerated legal set.
    #[error("invalid value for {tag}: {value}")]
    InvalidValue { tag: &'static str, value: String },
}

/// Requested handling for messages that fail authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    None,
    Quarantine,
    Reject,
}

impl FromStr for Disposition {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "quarantine" => Ok(Self::Quarantine),
            "reject" => Ok(Self::Reject),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Quarantine => "quarantine",
            Self::Reject => "reject",
        })
    }
}

/// Identifier matching rule between the authenticated domain and the
/// visible sender domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Relaxed,
    Strict,
}

impl FromStr for Alignment {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "r" => Ok(Self::Relaxed),
            "s" => Ok(Self::Strict),
            _ => Err(()),
        }
    }
}

/// Conditions under which per-message failure reports are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOption {
    /// Report when every underlying mechanism fails (`0`).
    AllFail,
    /// Report when any underlying mechanism fails (`1`).
    AnyFail,
    /// Report on a DKIM failure regardless of alignment (`d`).
    Dkim,
    /// Report on an SPF failure regardless of alignment (`s`).
    Spf,
}

impl FromStr for FailureOption {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "0" => Ok(Self::AllFail),
            "1" => Ok(Self::AnyFail),
            "d" => Ok(Self::Dkim),
            "s" => Ok(Self::Spf),
            _ => Err(()),
        }
    }
}

/// Registered failure report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Afrf,
    Iodef,
}

impl FromStr for ReportFormat {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "afrf" => Ok(Self::Afrf),
            "iodef" => Ok(Self::Iodef),
            _ => Err(()),
        }
    }
}

/// A parsed, always-valid policy record.
///
/// `version` and `policy` are mandatory; every other field defaults per the
/// record grammar. Fields are private so the enumerated-value invariants
/// hold across mutation, not just construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRecord {
    version: String,
    policy: Disposition,
    subdomain_policy: Option<Disposition>,
    dkim_alignment: Alignment,
    spf_alignment: Alignment,
    failure_options: Vec<FailureOption>,
    report_format: Vec<ReportFormat>,
    report_interval: u32,
    percentage: u8,
    aggregate_uris: String,
    failure_uris: String,
}

impl PolicyRecord {
    /// Create a record with the mandatory disposition and defaults for
    /// every optional tag.
    #[must_use]
    pub fn new(policy: Disposition) -> Self {
        Self {
            version: RECORD_VERSION.to_string(),
            policy,
            subdomain_policy: None,
            dkim_alignment: Alignment::default(),
            spf_alignment: Alignment::default(),
            failure_options: vec![FailureOption::AllFail],
            report_format: vec![ReportFormat::default()],
            report_interval: 86_400,
            percentage: 100,
            aggregate_uris: String::new(),
            failure_uris: String::new(),
        }
    }

    /// Parse a published record such as `v=DMARC1; p=reject; pct=50`.
    ///
    /// The version tag must come first and match [`RECORD_VERSION`]; the
    /// `p` tag is required. Unknown tags are ignored.
    ///
    /// # Errors
    /// Returns a [`PolicyError`] if a mandatory tag is missing or any tag
    /// value falls outside its enumerated legal set.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let mut tags = text
            .split(';')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(|tag| match tag.split_once('=') {
                Some((name, value)) => (name.trim(), value.trim()),
                None => (tag, ""),
            });

        match tags.next() {
            Some(("v", version)) if version == RECORD_VERSION => {}
            Some(("v", version)) => {
                return Err(PolicyError::UnsupportedVersion(version.to_string()));
            }
            _ => return Err(PolicyError::MissingVersion),
        }

        let mut policy = None;
        let mut record = Self::new(Disposition::None);

        for (name, value) in tags {
            match name {
                "p" => {
                    let parsed = value
                        .parse()
                        .map_err(|()| invalid("p", value))?;
                    record.set_policy(parsed);
                    policy = Some(parsed);
                }
                "sp" => record.set_subdomain_policy(Some(
                    value.parse().map_err(|()| invalid("sp", value))?,
                )),
                "adkim" => record.set_dkim_alignment(
                    value.parse().map_err(|()| invalid("adkim", value))?,
                ),
                "aspf" => record.set_spf_alignment(
                    value.parse().map_err(|()| invalid("aspf", value))?,
                ),
                "fo" => {
                    let options = value
                        .split(':')
                        .map(|flag| flag.trim().parse())
                        .collect::<Result<Vec<_>, ()>>()
                        .map_err(|()| invalid("fo", value))?;
                    record.set_failure_options(options)?;
                }
                "rf" => {
                    let formats = value
                        .split(':')
                        .map(|format| format.trim().parse())
                        .collect::<Result<Vec<_>, ()>>()
                        .map_err(|()| invalid("rf", value))?;
                    record.set_report_format(formats)?;
                }
                "ri" => record.set_report_interval(
                    value.parse().map_err(|_| invalid("ri", value))?,
                ),
                "pct" => {
                    let pct = value.parse().map_err(|_| invalid("pct", value))?;
                    record.set_percentage(pct)?;
                }
                "rua" => record.set_aggregate_uris(value),
                "ruf" => record.set_failure_uris(value),
                // Unknown tags are ignored per the record grammar.
                _ => {}
            }
        }

        if policy.is_none() {
            return Err(PolicyError::MissingTag("p"));
        }

        Ok(record)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub const fn policy(&self) -> Disposition {
        self.policy
    }

    /// The subdomain disposition, defaulting to the domain disposition
    /// when the record does not publish one.
    #[must_use]
    pub const fn subdomain_policy(&self) -> Disposition {
        match self.subdomain_policy {
            Some(policy) => policy,
            None => self.policy,
        }
    }

    #[must_use]
    pub const fn dkim_alignment(&self) -> Alignment {
        self.dkim_alignment
    }

    #[must_use]
    pub const fn spf_alignment(&self) -> Alignment {
        self.spf_alignment
    }

    #[must_use]
    pub fn failure_options(&self) -> &[FailureOption] {
        &self.failure_options
    }

    #[must_use]
    pub fn report_format(&self) -> &[ReportFormat] {
        &self.report_format
    }

    #[must_use]
    pub const fn report_interval(&self) -> u32 {
        self.report_interval
    }

    #[must_use]
    pub const fn percentage(&self) -> u8 {
        self.percentage
    }

    /// Raw comma-delimited aggregate report endpoint list.
    #[must_use]
    pub fn aggregate_uris(&self) -> &str {
        &self.aggregate_uris
    }

    /// Raw comma-delimited failure report endpoint list.
    #[must_use]
    pub fn failure_uris(&self) -> &str {
        &self.failure_uris
    }

    pub const fn set_policy(&mut self, policy: Disposition) {
        self.policy = policy;
    }

    pub const fn set_subdomain_policy(&mut self, policy: Option<Disposition>) {
        self.subdomain_policy = policy;
    }

    pub const fn set_dkim_alignment(&mut self, alignment: Alignment) {
        self.dkim_alignment = alignment;
    }

    pub const fn set_spf_alignment(&mut self, alignment: Alignment) {
        self.spf_alignment = alignment;
    }

    /// Replace the failure option set.
    ///
    /// # Errors
    /// Returns [`PolicyError::InvalidValue`] for an empty set; the record
    /// always carries at least the default `0` flag.
    pub fn set_failure_options(
        &mut self,
        options: Vec<FailureOption>,
    ) -> Result<(), PolicyError> {
        if options.is_empty() {
            return Err(invalid("fo", ""));
        }
        self.failure_options = options;
        self.failure_options.dedup();
        Ok(())
    }

    /// Replace the report format list.
    ///
    /// # Errors
    /// Returns [`PolicyError::InvalidValue`] for an empty list.
    pub fn set_report_format(
        &mut self,
        formats: Vec<ReportFormat>,
    ) -> Result<(), PolicyError> {
        if formats.is_empty() {
            return Err(invalid("rf", ""));
        }
        self.report_format = formats;
        Ok(())
    }

    pub const fn set_report_interval(&mut self, seconds: u32) {
        self.report_interval = seconds;
    }

    /// Set the sampling percentage.
    ///
    /// # Errors
    /// Returns [`PolicyError::InvalidValue`] when the value exceeds 100.
    pub fn set_percentage(&mut self, percentage: u8) -> Result<(), PolicyError> {
        if percentage > 100 {
            return Err(invalid("pct", &percentage.to_string()));
        }
        self.percentage = percentage;
        Ok(())
    }

    pub fn set_aggregate_uris(&mut self, uris: &str) {
        self.aggregate_uris = uris.to_string();
    }

    pub fn set_failure_uris(&mut self, uris: &str) {
        self.failure_uris = uris.to_string();
    }
}

fn invalid(tag: &'static str, value: &str) -> PolicyError {
    PolicyError::InvalidValue {
        tag,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_record_with_defaults() {
        let record = PolicyRecord::parse("v=DMARC1; p=reject; pct=50").unwrap();
        assert_eq!(record.policy(), Disposition::Reject);
        assert_eq!(record.percentage(), 50);
        assert_eq!(record.dkim_alignment(), Alignment::Relaxed);
        assert_eq!(record.spf_alignment(), Alignment::Relaxed);
        assert_eq!(record.report_interval(), 86_400);
        assert_eq!(record.failure_options(), &[FailureOption::AllFail]);
        assert_eq!(record.report_format(), &[ReportFormat::Afrf]);
    }

    #[test]
    fn subdomain_policy_defaults_to_domain_policy() {
        let record = PolicyRecord::parse("v=DMARC1; p=quarantine").unwrap();
        assert_eq!(record.subdomain_policy(), Disposition::Quarantine);

        let record = PolicyRecord::parse("v=DMARC1; p=quarantine; sp=none").unwrap();
        assert_eq!(record.subdomain_policy(), Disposition::None);
    }

    #[test]
    fn parses_full_record() {
        let record = PolicyRecord::parse(
            "v=DMARC1; p=none; sp=reject; adkim=s; aspf=r; fo=1:d; rf=afrf; \
             ri=3600; pct=25; rua=mailto:agg@example.com; ruf=mailto:fail@example.com",
        )
        .unwrap();
        assert_eq!(record.dkim_alignment(), Alignment::Strict);
        assert_eq!(
            record.failure_options(),
            &[FailureOption::AnyFail, FailureOption::Dkim]
        );
        assert_eq!(record.report_interval(), 3600);
        assert_eq!(record.aggregate_uris(), "mailto:agg@example.com");
        assert_eq!(record.failure_uris(), "mailto:fail@example.com");
    }

    #[test]
    fn version_must_come_first_and_match() {
        assert_eq!(
            PolicyRecord::parse("p=reject; v=DMARC1"),
            Err(PolicyError::MissingVersion)
        );
        assert_eq!(
            PolicyRecord::parse("v=DMARC2; p=reject"),
            Err(PolicyError::UnsupportedVersion("DMARC2".to_string()))
        );
    }

    #[test]
    fn policy_tag_is_mandatory() {
        assert_eq!(
            PolicyRecord::parse("v=DMARC1; pct=50"),
            Err(PolicyError::MissingTag("p"))
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert_eq!(
            PolicyRecord::parse("v=DMARC1; p=reject; pct=101"),
            Err(PolicyError::InvalidValue {
                tag: "pct",
                value: "101".to_string()
            })
        );
        assert!(PolicyRecord::parse("v=DMARC1; p=maybe").is_err());
        assert!(PolicyRecord::parse("v=DMARC1; p=reject; adkim=x").is_err());
        assert!(PolicyRecord::parse("v=DMARC1; p=reject; fo=2").is_err());
    }

    #[test]
    fn setters_enforce_invariants_after_construction() {
        let mut record = PolicyRecord::new(Disposition::None);
        assert!(record.set_percentage(100).is_ok());
        assert!(record.set_percentage(101).is_err());
        assert_eq!(record.percentage(), 100);

        assert!(record.set_failure_options(Vec::new()).is_err());
        assert!(record.set_report_format(Vec::new()).is_err());
        assert_eq!(record.failure_options(), &[FailureOption::AllFail]);
    }

    #[test]
    fn ignores_unknown_tags() {
        let record = PolicyRecord::parse("v=DMARC1; p=none; zz=wat").unwrap();
        assert_eq!(record.policy(), Disposition::None);
    }
}
