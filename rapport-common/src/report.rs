//! Queued aggregate report model.
//!
//! Reports are produced by the report generation subsystem and queued for
//! delivery. The delivery engine treats them as read-only apart from the
//! persisted error count, which only the error accountant advances.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::Disposition;

/// Opaque identifier of a queued report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(String);

impl ReportId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReportId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Snapshot of the published policy taken when the report was generated.
///
/// The `rua` endpoint list is the part the delivery engine routes on; the
/// rest is carried for the report payload and operator logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Raw comma-delimited aggregate report endpoint list.
    pub rua: String,
    /// Published disposition, if the generator recorded one.
    #[serde(default)]
    pub disposition: Option<Disposition>,
    /// Published sampling percentage, if the generator recorded one.
    #[serde(default)]
    pub percentage: Option<u8>,
}

impl PolicySnapshot {
    #[must_use]
    pub fn new(rua: impl Into<String>) -> Self {
        Self {
            rua: rua.into(),
            disposition: None,
            percentage: None,
        }
    }
}

/// A generated aggregate report awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Queue identifier.
    pub id: ReportId,
    /// Domain the report is about.
    pub source_domain: String,
    /// Published policy at generation time.
    pub policy: PolicySnapshot,
    /// The report payload.
    pub xml: String,
    /// Persisted delivery error count, monotonic until deletion.
    #[serde(default)]
    pub error_count: u32,
}

impl AggregateReport {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source_domain: impl Into<String>,
        policy: PolicySnapshot,
        xml: impl Into<String>,
    ) -> Self {
        Self {
            id: ReportId::new(id),
            source_domain: source_domain.into(),
            policy,
            xml: xml.into(),
            error_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_roundtrips_through_serde() {
        let report = AggregateReport::new(
            "r-1",
            "example.com",
            PolicySnapshot::new("mailto:agg@example.com"),
            "<feedback/>",
        );
        let json = serde_json::to_string(&report).unwrap();
        let back: AggregateReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.error_count, 0);
    }

    #[test]
    fn report_id_displays_raw_value() {
        assert_eq!(ReportId::from("abc").to_string(), "abc");
    }
}
