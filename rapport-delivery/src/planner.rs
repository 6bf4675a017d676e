//! Endpoint resolution and size-limit enforcement.
//!
//! The payload is compressed exactly once per report; the resulting byte
//! length is checked against each endpoint's declared cap.

use std::io::Write;

use flate2::{Compression, write::GzEncoder};
use rapport_common::report::AggregateReport;

use crate::{
    endpoint::{self, DeliveryEndpoint},
    error::DeliveryError,
};

/// Result of checking a payload against one endpoint's cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    Fits,
    TooBig,
}

/// Resolve the ordered endpoint list for a report.
///
/// # Errors
/// Returns [`DeliveryError::Unroutable`] when the `rua` field is empty
/// or contains no parseable endpoint; the caller must delete the report
/// immediately rather than retry it.
pub fn resolve_endpoints(
    report: &AggregateReport,
) -> Result<Vec<DeliveryEndpoint>, DeliveryError> {
    let rua = report.policy.rua.trim();
    if rua.is_empty() {
        return Err(DeliveryError::Unroutable);
    }

    let endpoints = endpoint::parse_rua(rua);
    if endpoints.is_empty() {
        return Err(DeliveryError::Unroutable);
    }
    Ok(endpoints)
}

/// Gzip the report payload. Deterministic, called once per report.
///
/// # Errors
/// Returns the underlying IO error if the encoder fails.
pub fn compress(payload: &str) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload.as_bytes())?;
    encoder.finish()
}

/// Check a compressed payload length against an endpoint's cap.
#[must_use]
pub const fn check_size(endpoint: &DeliveryEndpoint, byte_len: u64) -> SizeCheck {
    match endpoint.max_bytes {
        Some(cap) if byte_len > cap => SizeCheck::TooBig,
        _ => SizeCheck::Fits,
    }
}

/// Body of the short notice sent when a report exceeds every endpoint's
/// cap. The notice is best-effort; the report is deleted regardless.
#[must_use]
pub fn oversize_notice(report: &AggregateReport, compressed_len: u64) -> String {
    format!(
        "The aggregate report for {domain} (report id {id}) was generated \
         but exceeds the size limit you published for every report \
         endpoint: the compressed report is {compressed_len} bytes. The \
         report has been discarded and will not be retransmitted.\n",
        domain = report.source_domain,
        id = report.id,
    )
}

#[cfg(test)]
mod tests {
    use rapport_common::report::PolicySnapshot;

    use super::*;

    fn report_with_rua(rua: &str) -> AggregateReport {
        AggregateReport::new("r-1", "example.com", PolicySnapshot::new(rua), "<feedback/>")
    }

    #[test]
    fn empty_rua_is_unroutable() {
        assert!(matches!(
            resolve_endpoints(&report_with_rua("")),
            Err(DeliveryError::Unroutable)
        ));
        assert!(matches!(
            resolve_endpoints(&report_with_rua("   ")),
            Err(DeliveryError::Unroutable)
        ));
    }

    #[test]
    fn unparseable_rua_is_unroutable() {
        assert!(matches!(
            resolve_endpoints(&report_with_rua("gopher://old, not-a-uri")),
            Err(DeliveryError::Unroutable)
        ));
    }

    #[test]
    fn resolves_endpoints_in_declared_order() {
        let endpoints = resolve_endpoints(&report_with_rua(
            "mailto:first@example.com, https://second.example.net/in",
        ))
        .unwrap();
        assert_eq!(endpoints[0].address, "first@example.com");
        assert_eq!(endpoints[1].address, "https://second.example.net/in");
    }

    #[test]
    fn compression_is_deterministic() {
        let payload = "<feedback>some report body</feedback>";
        assert_eq!(compress(payload).unwrap(), compress(payload).unwrap());
    }

    #[test]
    fn compressed_output_is_gzip() {
        let bytes = compress("<feedback/>").unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn size_check_honors_caps() {
        let capped = DeliveryEndpoint::parse("mailto:a@b.c!100").unwrap();
        assert_eq!(check_size(&capped, 100), SizeCheck::Fits);
        assert_eq!(check_size(&capped, 101), SizeCheck::TooBig);

        let uncapped = DeliveryEndpoint::parse("mailto:a@b.c").unwrap();
        assert_eq!(check_size(&uncapped, u64::MAX), SizeCheck::Fits);
    }

    #[test]
    fn notice_names_report_and_size() {
        let notice = oversize_notice(&report_with_rua("mailto:a@b.c!1"), 512);
        assert!(notice.contains("example.com"));
        assert!(notice.contains("r-1"));
        assert!(notice.contains("512 bytes"));
    }
}
