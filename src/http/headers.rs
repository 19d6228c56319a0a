//! Header manipulation for forwarded messages.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Extend X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host, Forwarded and Via
//!
//! # Design Decisions
//! - Proxy-chain headers are only ever extended, never replaced
//! - Headers named by `Connection` tokens are hop-by-hop as well
//! - Values are joined as raw bytes so non-UTF-8 entries survive

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::net::{IpAddr, SocketAddr};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Pseudonym this proxy uses in `Via`.
pub const VIA_PSEUDONYM: &str = "forward-proxy";

/// Headers that only have meaning for a single transport connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let nominated: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| HeaderName::from_bytes(token.as_bytes()).ok())
        .collect();

    for name in &nominated {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Describes the hop being added to the proxy chain.
#[derive(Debug, Clone, Copy)]
pub struct ForwardedHop<'a> {
    pub client: SocketAddr,
    pub proto: &'a str,
    /// Host the client asked for, if known.
    pub host: Option<&'a str>,
}

/// Append this hop to every proxy-chain header.
pub fn append_forwarded(headers: &mut HeaderMap, hop: ForwardedHop<'_>) {
    let client_ip = hop.client.ip().to_string();
    extend_list(headers, X_FORWARDED_FOR, client_ip.as_bytes());
    extend_list(headers, X_FORWARDED_PROTO, hop.proto.as_bytes());
    if let Some(host) = hop.host {
        extend_list(headers, X_FORWARDED_HOST, host.as_bytes());
    }
    extend_list(headers, header::FORWARDED, forwarded_element(hop).as_bytes());
    append_via(headers);
}

/// Record this proxy in `Via`; applied in both directions.
pub fn append_via(headers: &mut HeaderMap) {
    extend_list(
        headers,
        header::VIA,
        format!("1.1 {VIA_PSEUDONYM}").as_bytes(),
    );
}

/// Whether a `Via` entry already names this proxy, i.e. the request has
/// come back around.
pub fn via_names_self(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::VIA)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|entry| entry.split_whitespace().nth(1))
        .any(|received_by| received_by.eq_ignore_ascii_case(VIA_PSEUDONYM))
}

/// RFC 7239 forwarded-element for this hop.
fn forwarded_element(hop: ForwardedHop<'_>) -> String {
    let node = match hop.client.ip() {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("\"[{ip}]\""),
    };
    let mut element = format!("for={node};proto={}", hop.proto);
    if let Some(host) = hop.host {
        element.push_str(&format!(";host=\"{}\"", host.replace('"', "")));
    }
    element
}

/// Join existing values of `name` with `item` into one comma-separated value.
fn extend_list(headers: &mut HeaderMap, name: HeaderName, item: &[u8]) {
    let mut joined: Vec<u8> = Vec::new();
    for value in headers.get_all(&name) {
        let value = value.as_bytes().trim_ascii();
        if value.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.extend_from_slice(b", ");
        }
        joined.extend_from_slice(value);
    }
    if !joined.is_empty() {
        joined.extend_from_slice(b", ");
    }
    joined.extend_from_slice(item);

    match HeaderValue::from_bytes(&joined) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            tracing::debug!(header = %name, "Skipping proxy-chain header with invalid bytes");
        }
    }
}
