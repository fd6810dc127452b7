//! Per-session cookie jar (spec §4.1).
//!
//! Split the way the teacher splits its scraping pipeline into focused
//! submodules (`scraping/rust_scraper/{parse,clean,quality}.rs`): `parse` for
//! RFC 6265 `Set-Cookie` parsing, `jar` for the domain/path-indexed store and
//! matching, this module for the `Cookie` type itself.

pub mod jar;
pub mod parse;

pub use jar::CookieJar;

use serde::{Deserialize, Serialize};

/// `SameSite` attribute values (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    None,
    Lax,
    Strict,
}

/// A single cookie record (spec §3 data model).
///
/// `domain` stores the effective domain exactly as matched: a leading `.`
/// indicates subdomain-inclusive scope; no leading `.` means host-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    /// Absolute expiry as a Unix timestamp (seconds). `None` = session cookie.
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

impl Cookie {
    /// `true` once `expires_at` has passed relative to `now` (Unix seconds).
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }

    /// Domain-match per RFC 6265 §5.1.3: exact host match, or a `.`-prefixed
    /// suffix match against `request_host`.
    pub fn domain_matches(&self, request_host: &str) -> bool {
        if let Some(suffix) = self.domain.strip_prefix('.') {
            request_host == suffix || request_host.ends_with(&format!(".{suffix}"))
        } else {
            self.domain == request_host
        }
    }

    /// Path-match per RFC 6265 §5.1.4: the cookie path is a prefix of the
    /// request path, on a path-segment boundary (or an exact match).
    pub fn path_matches(&self, request_path: &str) -> bool {
        if self.path == request_path {
            return true;
        }
        if !request_path.starts_with(&self.path) {
            return false;
        }
        // request_path extends cookie path — must land on a '/' boundary,
        // or the cookie path itself is "/".
        self.path == "/" || request_path[self.path.len()..].starts_with('/')
    }
}

/// The triple that uniquely identifies a cookie within a jar (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CookieKey {
    pub domain: String,
    pub path: String,
    pub name: String,
}

impl CookieKey {
    pub fn of(cookie: &Cookie) -> Self {
        Self {
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            name: cookie.name.clone(),
        }
    }
}

/// Default path per RFC 6265 §5.1.4, derived from the request URI: the
/// directory portion of the path, or `/` if the path has no directory
/// component or is empty.
pub fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
        None => "/".to_string(),
    }
}
