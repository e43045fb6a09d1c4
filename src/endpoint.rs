//! Endpoint canonicalization: classifying "reserved" hosts and rewriting
//! between the `ingest-` (data-management) and plain (query-engine) forms
//! of a cluster URL.

use url::Url;

const INGEST_PREFIX: &str = "ingest-";
const ONEBOX_HOST: &str = "onebox.dev.kusto.windows.net";

/// Rewrites `url` into its `ingest-` (data-management) form, unless it is
/// already in that form or is a [`is_reserved_host`] host.
pub fn to_ingest_endpoint(url: &str) -> String {
    if url.contains(INGEST_PREFIX) || is_reserved_host(url) {
        return url.to_string();
    }
    insert_after_scheme(url, INGEST_PREFIX)
}

/// Rewrites `url` into its plain (query-engine) form by removing the first
/// `ingest-` occurrence, unless it is a [`is_reserved_host`] host.
pub fn to_query_endpoint(url: &str) -> String {
    if is_reserved_host(url) {
        return url.to_string();
    }
    match url.find(INGEST_PREFIX) {
        Some(idx) => {
            let mut out = String::with_capacity(url.len() - INGEST_PREFIX.len());
            out.push_str(&url[..idx]);
            out.push_str(&url[idx + INGEST_PREFIX.len()..]);
            out
        }
        None => url.to_string(),
    }
}

/// `Option`-aware counterpart of [`to_ingest_endpoint`]: a missing URL is
/// returned unchanged (there is nothing to canonicalize).
pub fn to_ingest_endpoint_opt(url: Option<&str>) -> Option<String> {
    url.map(to_ingest_endpoint)
}

/// Inserts `prefix` immediately after `scheme://`, or at the very front if
/// `url` has no scheme separator at all.
fn insert_after_scheme(url: &str, prefix: &str) -> String {
    match url.find("://") {
        Some(idx) => {
            let split = idx + 3;
            let mut out = String::with_capacity(url.len() + prefix.len());
            out.push_str(&url[..split]);
            out.push_str(prefix);
            out.push_str(&url[split..]);
            out
        }
        None => format!("{prefix}{url}"),
    }
}

/// A host is reserved when the `ingest-`/non-`ingest-` rewrite must never be
/// applied to it: unparsable or non-absolute URLs, loopback, literal IPv4
/// and IPv6 addresses, and the `onebox` test cluster hostname.
pub fn is_reserved_host(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    if parsed.cannot_be_a_base() {
        return true;
    }
    let Some(host) = parsed.host_str() else {
        return true;
    };

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if host.eq_ignore_ascii_case(ONEBOX_HOST) {
        return true;
    }
    if is_ipv4_literal(host) {
        return true;
    }
    if matches!(parsed.host(), Some(url::Host::Ipv6(_))) {
        return true;
    }
    false
}

/// Strict IPv4-literal check: exactly four dot-separated decimal octets,
/// each in `0..=255`, no leading/trailing garbage beyond an optional port
/// (which `Url::host_str` has already stripped for us).
fn is_ipv4_literal(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|part| {
        !part.is_empty()
            && part.chars().all(|c| c.is_ascii_digit())
            && part.parse::<u16>().is_ok_and(|n| n <= 255)
    })
}
