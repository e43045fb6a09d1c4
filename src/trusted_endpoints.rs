//! Trusted-endpoint matching against the packaged well-known-endpoints
//! allowlist. Grounded in the teacher's singleton/`LazyLock` idiom (see
//! `lib/vector-buffers/src/internal_events.rs`'s `LazyLock<DashMap<..>>`),
//! with the mutable-flag pattern replaced by construction-time
//! configuration per `SPEC_FULL.md` §9.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Deserialize;

use crate::error::IngestError;

pub const PUBLIC_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

const WELL_KNOWN_ENDPOINTS_JSON: &str = include_str!("../resources/well_known_endpoints.json");

#[derive(Debug, Deserialize)]
struct RawAllowlist {
    #[serde(rename = "AllowedEndpointsByLogin")]
    allowed_endpoints_by_login: HashMap<String, RawLoginEntry>,
}

#[derive(Debug, Deserialize)]
struct RawLoginEntry {
    #[serde(rename = "AllowedKustoSuffixes")]
    allowed_kusto_suffixes: Vec<String>,
    #[serde(rename = "AllowedKustoHostnames")]
    allowed_kusto_hostnames: Vec<String>,
}

/// A suffix/exact-hostname matcher built from one login entry's allowlist.
#[derive(Debug, Clone)]
struct LoginMatcher {
    suffixes: Vec<String>,
    hostnames: Vec<String>,
}

impl LoginMatcher {
    fn matches(&self, host: &str) -> bool {
        let host_lower = host.to_ascii_lowercase();
        if self
            .hostnames
            .iter()
            .any(|h| h.eq_ignore_ascii_case(&host_lower))
        {
            return true;
        }
        self.suffixes.iter().any(|suffix| {
            let suffix_lower = suffix.to_ascii_lowercase();
            host_lower == suffix_lower || host_lower.ends_with(&format!(".{suffix_lower}"))
        })
    }
}

static WELL_KNOWN_ENDPOINTS: LazyLock<HashMap<String, LoginMatcher>> = LazyLock::new(|| {
    let raw: RawAllowlist = serde_json::from_str(WELL_KNOWN_ENDPOINTS_JSON)
        .expect("packaged well_known_endpoints.json must parse");
    raw.allowed_endpoints_by_login
        .into_iter()
        .map(|(login, entry)| {
            (
                login.to_ascii_lowercase(),
                LoginMatcher {
                    suffixes: entry.allowed_kusto_suffixes,
                    hostnames: entry.allowed_kusto_hostnames,
                },
            )
        })
        .collect()
});

/// A caller-installed override that takes precedence over the packaged
/// allowlist. Matching `Some(true)`/`Some(false)` is authoritative; `None`
/// falls through to the packaged data.
pub type OverrideMatcher = Box<dyn Fn(&str) -> Option<bool> + Send + Sync>;

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];

/// Owns the optional override matcher and the "fail open with a warning vs.
/// fail closed" policy flag for one client.
pub struct TrustedEndpoints {
    override_matcher: Option<OverrideMatcher>,
    additional_matcher: Option<OverrideMatcher>,
    enforce: bool,
}

impl Default for TrustedEndpoints {
    fn default() -> Self {
        Self {
            override_matcher: None,
            additional_matcher: None,
            enforce: true,
        }
    }
}

impl TrustedEndpoints {
    /// Builds a validator with an authoritative override installed.
    pub fn with_override(matcher: OverrideMatcher) -> Self {
        Self {
            override_matcher: Some(matcher),
            ..Self::default()
        }
    }

    /// Adds an additional matcher consulted after the packaged allowlist
    /// but before the loopback/enforcement fallback.
    pub fn with_additional_matcher(mut self, matcher: OverrideMatcher) -> Self {
        self.additional_matcher = Some(matcher);
        self
    }

    /// When `false`, an untrusted endpoint only logs a warning instead of
    /// failing. Intended for `skip_security_checks`.
    pub fn enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    /// Validates `uri`'s host against `login_endpoint`'s allowlist.
    pub fn validate(&self, uri: &str, login_endpoint: &str) -> Result<(), IngestError> {
        let Ok(parsed) = url::Url::parse(uri) else {
            return Err(IngestError::InvalidConnectionString {
                message: format!("cannot parse endpoint: {uri}"),
            });
        };
        let Some(host) = parsed.host_str() else {
            return Err(IngestError::InvalidConnectionString {
                message: format!("endpoint has no host: {uri}"),
            });
        };

        if let Some(matcher) = &self.override_matcher {
            if let Some(decision) = matcher(host) {
                return if decision {
                    Ok(())
                } else {
                    Err(untrusted(uri))
                };
            }
        }

        let login_key = login_endpoint.to_ascii_lowercase();
        if let Some(entry) = WELL_KNOWN_ENDPOINTS.get(&login_key) {
            if entry.matches(host) {
                return Ok(());
            }
        }

        if let Some(matcher) = &self.additional_matcher {
            if matches!(matcher(host), Some(true)) {
                return Ok(());
            }
        }

        if LOOPBACK_HOSTS
            .iter()
            .any(|loopback| host.eq_ignore_ascii_case(loopback))
        {
            return Ok(());
        }

        if !self.enforce {
            tracing::warn!(
                endpoint = uri,
                "endpoint is not on the trusted allowlist; continuing because validation is disabled"
            );
            return Ok(());
        }

        Err(untrusted(uri))
    }
}

fn untrusted(uri: &str) -> IngestError {
    IngestError::InvalidConnectionString {
        message: format!("endpoint '{uri}' is not a trusted Kusto endpoint"),
    }
}
