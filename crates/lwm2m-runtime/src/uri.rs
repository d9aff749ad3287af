//! Parsing of instance location URIs
//!
//! Instance URIs name IP literals, never DNS names; there is no resolver on
//! the target class of device. An IPv6 literal may carry an interface zone
//! (`[fe80::1%6]`, or percent-encoded `%256`), which is stripped before URL
//! parsing and reported separately.

use std::net::IpAddr;

use lwm2m_core::{Endpoint, Lwm2mError};
use url::{Host, Url};

/// A parsed instance location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedUri {
    pub addr: IpAddr,
    /// Absent when the URI carries no explicit port
    pub port: Option<u16>,
    pub zone: Option<u32>,
    /// True for the encrypted scheme
    pub secure: bool,
}

impl ParsedUri {
    /// Endpoint with the given fallback for a missing port.
    pub fn endpoint(&self, default_port: u16) -> Endpoint {
        let ep = Endpoint::new(self.addr, self.port.unwrap_or(default_port));
        match self.zone {
            Some(zone) => ep.with_zone(zone),
            None => ep,
        }
    }
}

/// Parse a `coap://` or `coaps://` URI holding an IP literal.
pub fn parse_uri(uri: &str) -> Result<ParsedUri, Lwm2mError> {
    let (stripped, zone) = strip_zone(uri)?;

    let url = Url::parse(&stripped)
        .map_err(|e| Lwm2mError::configuration(format!("invalid URI {uri:?}: {e}")))?;

    let secure = match url.scheme() {
        "coap" => false,
        "coaps" => true,
        other => {
            return Err(Lwm2mError::configuration(format!(
                "unsupported scheme {other:?} in {uri:?}"
            )))
        }
    };

    // non-special schemes surface IPv4 literals as opaque domains
    let addr = match url.host() {
        Some(Host::Ipv6(v6)) => IpAddr::V6(v6),
        Some(Host::Ipv4(v4)) => IpAddr::V4(v4),
        Some(Host::Domain(host)) => host
            .parse::<IpAddr>()
            .map_err(|_| Lwm2mError::configuration(format!("host is not an IP literal: {host:?}")))?,
        None => return Err(Lwm2mError::configuration(format!("URI has no host: {uri:?}"))),
    };

    Ok(ParsedUri {
        addr,
        port: url.port(),
        zone,
        secure,
    })
}

/// Remove a `%zone` suffix from a bracketed IPv6 host, returning the cleaned
/// URI and the numeric zone.
fn strip_zone(uri: &str) -> Result<(String, Option<u32>), Lwm2mError> {
    let Some(open) = uri.find('[') else {
        return Ok((uri.to_string(), None));
    };
    let close = open
        + uri[open..]
            .find(']')
            .ok_or_else(|| Lwm2mError::configuration(format!("unterminated IPv6 literal: {uri:?}")))?;
    let Some(percent) = uri[open..close].find('%').map(|i| open + i) else {
        return Ok((uri.to_string(), None));
    };

    let raw_zone = &uri[percent + 1..close];
    // the separator itself may arrive percent-encoded
    let raw_zone = raw_zone.strip_prefix("25").filter(|z| !z.is_empty()).unwrap_or(raw_zone);
    let zone = raw_zone
        .parse::<u32>()
        .map_err(|_| Lwm2mError::configuration(format!("non-numeric interface zone: {raw_zone:?}")))?;

    let mut cleaned = String::with_capacity(uri.len());
    cleaned.push_str(&uri[..percent]);
    cleaned.push_str(&uri[close..]);
    Ok((cleaned, Some(zone)))
}
