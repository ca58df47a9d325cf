//! Credential extraction across the carrier shapes a request may arrive with.
//!
//! Hosting dispatch layers present credentials in any subset of four shapes:
//! a structured cookie list, a multi-value header map, a single-value header
//! map, and the `Authorization` header. Lookup walks them in that fixed
//! priority; the bearer header only ever satisfies access-token lookups, so a
//! refresh token cannot leak in through a non-cookie channel.

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use std::collections::HashMap;

/// Which carrier satisfied a lookup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CarrierSource {
    CookieEntry,
    MultiValueCookieHeader,
    SingleValueCookieHeader,
    BearerHeader,
}

impl CarrierSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CookieEntry => "cookie-entry",
            Self::MultiValueCookieHeader => "multi-value-cookie-header",
            Self::SingleValueCookieHeader => "single-value-cookie-header",
            Self::BearerHeader => "bearer-header",
        }
    }
}

/// A found token plus where it came from.
#[derive(Clone, Debug)]
pub struct Extraction {
    pub value: String,
    pub source: CarrierSource,
}

/// Observability descriptor for a lookup: carrier presence and the winner,
/// never the token value itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractionDiagnostics {
    pub cookie_entries: usize,
    pub multi_cookie_values: usize,
    pub has_single_cookie_header: bool,
    pub has_authorization: bool,
    pub source: Option<CarrierSource>,
}

impl std::fmt::Display for ExtractionDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "source={} cookie_entries={} multi_cookie_values={} single_cookie_header={} authorization={}",
            self.source.map_or("none", CarrierSource::as_str),
            self.cookie_entries,
            self.multi_cookie_values,
            self.has_single_cookie_header,
            self.has_authorization,
        )
    }
}

/// The carrier shapes one request may present. Any subset may be absent.
#[derive(Clone, Debug, Default)]
pub struct RequestCarriers {
    /// Discrete, already-parsed cookie entries.
    pub cookie_entries: Option<Vec<(String, String)>>,
    /// Header name → all values seen for it.
    pub multi_headers: Option<HashMap<String, Vec<String>>>,
    /// Header name → single value.
    pub single_headers: Option<HashMap<String, String>>,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
}

impl RequestCarriers {
    /// Build carriers from an axum header map. All `Cookie` header values
    /// feed the multi-value carrier.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let cookie_values: Vec<String> = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();

        let multi_headers = if cookie_values.is_empty() {
            None
        } else {
            let mut map = HashMap::new();
            map.insert("cookie".to_string(), cookie_values);
            Some(map)
        };

        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Self {
            cookie_entries: None,
            multi_headers,
            single_headers: None,
            authorization,
        }
    }

    /// Find the first token for `cookie_name` in fixed carrier priority.
    /// `allow_bearer` must be false for refresh-token lookups.
    ///
    /// "Not found" is `None`; callers treat it uniformly as unauthenticated.
    #[must_use]
    pub fn find_token(
        &self,
        cookie_name: &str,
        allow_bearer: bool,
    ) -> (Option<Extraction>, ExtractionDiagnostics) {
        let mut diagnostics = ExtractionDiagnostics {
            cookie_entries: self.cookie_entries.as_ref().map_or(0, Vec::len),
            multi_cookie_values: self
                .multi_headers
                .as_ref()
                .and_then(cookie_values)
                .map_or(0, Vec::len),
            has_single_cookie_header: self
                .single_headers
                .as_ref()
                .is_some_and(|map| lookup_cookie_key(map.keys()).is_some()),
            has_authorization: self.authorization.is_some(),
            source: None,
        };

        if let Some(entries) = &self.cookie_entries
            && let Some((_, value)) = entries.iter().find(|(name, _)| name == cookie_name)
        {
            diagnostics.source = Some(CarrierSource::CookieEntry);
            return (
                Some(Extraction {
                    value: value.clone(),
                    source: CarrierSource::CookieEntry,
                }),
                diagnostics,
            );
        }

        if let Some(map) = &self.multi_headers
            && let Some(values) = cookie_values(map)
            && let Some(value) = values
                .iter()
                .find_map(|header| parse_cookie_header(header, cookie_name))
        {
            diagnostics.source = Some(CarrierSource::MultiValueCookieHeader);
            return (
                Some(Extraction {
                    value,
                    source: CarrierSource::MultiValueCookieHeader,
                }),
                diagnostics,
            );
        }

        if let Some(map) = &self.single_headers
            && let Some(header) = lookup_cookie_key(map.keys()).and_then(|key| map.get(key))
            && let Some(value) = parse_cookie_header(header, cookie_name)
        {
            diagnostics.source = Some(CarrierSource::SingleValueCookieHeader);
            return (
                Some(Extraction {
                    value,
                    source: CarrierSource::SingleValueCookieHeader,
                }),
                diagnostics,
            );
        }

        if allow_bearer
            && let Some(header) = &self.authorization
            && let Some(value) = parse_bearer(header)
        {
            diagnostics.source = Some(CarrierSource::BearerHeader);
            return (
                Some(Extraction {
                    value,
                    source: CarrierSource::BearerHeader,
                }),
                diagnostics,
            );
        }

        (None, diagnostics)
    }
}

fn cookie_values(map: &HashMap<String, Vec<String>>) -> Option<&Vec<String>> {
    map.get("cookie").or_else(|| map.get("Cookie"))
}

fn lookup_cookie_key<'a>(keys: impl Iterator<Item = &'a String>) -> Option<&'a String> {
    keys.into_iter().find(|key| key.eq_ignore_ascii_case("cookie"))
}

/// Parse a `;`-delimited cookie header for `name`. Malformed segments
/// (missing `=`, empty name) are skipped without aborting the remaining
/// parse; the first occurrence of a name wins.
fn parse_cookie_header(header: &str, name: &str) -> Option<String> {
    for segment in header.split(';') {
        let trimmed = segment.trim();
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        if key == name {
            return Some(value.trim().to_string());
        }
    }
    None
}

fn parse_bearer(header: &str) -> Option<String> {
    let trimmed = header.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
