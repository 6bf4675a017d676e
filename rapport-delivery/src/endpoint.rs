//! Delivery endpoint parsing.
//!
//! Endpoints are derived once per report from its `rua` field. The
//! transport kind is a tag decided here, at parse time, so dispatch is
//! an exhaustive match rather than repeated scheme sniffing.

/// Transport used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// `mailto:` — delivered through an SMTP session.
    Mail,
    /// `http:`/`https:` — delivered with a single POST.
    Web,
}

/// One requested destination for a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEndpoint {
    pub kind: EndpointKind,
    /// Mail address or URL, without the `mailto:` prefix for mail.
    pub address: String,
    /// Optional receiver-declared size cap in bytes.
    pub max_bytes: Option<u64>,
}

impl DeliveryEndpoint {
    /// Parse one comma-separated `rua` element, e.g.
    /// `mailto:agg@example.com!10m` or `https://rep.example.net/dmarc`.
    ///
    /// Returns `None` for unrecognized schemes, empty addresses, or a
    /// malformed size suffix — such elements simply do not route.
    #[must_use]
    pub fn parse(element: &str) -> Option<Self> {
        let element = element.trim();

        let (address, max_bytes) = match element.rsplit_once('!') {
            Some((address, size)) => (address, Some(parse_size(size)?)),
            None => (element, None),
        };

        if let Some(mail) = address.strip_prefix("mailto:") {
            if mail.is_empty() || !mail.contains('@') {
                return None;
            }
            return Some(Self {
                kind: EndpointKind::Mail,
                address: mail.to_string(),
                max_bytes,
            });
        }

        if address.starts_with("http://") || address.starts_with("https://") {
            return Some(Self {
                kind: EndpointKind::Web,
                address: address.to_string(),
                max_bytes,
            });
        }

        None
    }
}

/// Parse a size suffix: digits with an optional k/m/g/t multiplier.
fn parse_size(size: &str) -> Option<u64> {
    if size.is_empty() {
        return None;
    }

    let (digits, multiplier) = match size.as_bytes().last() {
        Some(b'k' | b'K') => (&size[..size.len() - 1], 1024),
        Some(b'm' | b'M') => (&size[..size.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&size[..size.len() - 1], 1024 * 1024 * 1024),
        Some(b't' | b'T') => (&size[..size.len() - 1], 1024_u64.pow(4)),
        _ => (size, 1),
    };

    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Split a raw `rua` value into its routable endpoints. Unparseable
/// elements are dropped; an empty result means the report is
/// unroutable.
#[must_use]
pub fn parse_rua(rua: &str) -> Vec<DeliveryEndpoint> {
    rua.split(',').filter_map(DeliveryEndpoint::parse).collect()
}
