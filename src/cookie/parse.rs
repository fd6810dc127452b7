//! `Set-Cookie` parsing per RFC 6265 §5.2 (spec §4.1).
//!
//! Parse errors never fail the surrounding request (spec §4.1 Failure
//! semantics): every fallible path here returns `None` and the caller logs a
//! `tracing::warn!` and drops the cookie, the same drop-and-log discipline
//! the teacher uses for malformed `session_store.rs` session files.

use tracing::warn;

use super::{default_path, Cookie, SameSite};

/// Parse a single `Set-Cookie` header value against the request it arrived
/// on. `request_host` and `request_path` come from the request URL; `now` is
/// the current Unix timestamp (seconds), used to resolve `Max-Age`/`Expires`.
///
/// Returns `None` when the header is malformed or names a `Domain` that is
/// not a suffix of `request_host` (spec §4.1: "a parse error and the cookie
/// is rejected").
pub fn parse_set_cookie(
    header_value: &str,
    request_host: &str,
    request_path: &str,
    now: i64,
) -> Option<Cookie> {
    let mut parts = header_value.split(';');

    let (name, value) = parse_name_value(parts.next()?)?;
    if name.is_empty() {
        warn!("cookie parse: empty name in Set-Cookie, dropping");
        return None;
    }

    let mut domain: Option<String> = None;
    let mut path: Option<String> = None;
    let mut expires: Option<i64> = None;
    let mut max_age: Option<i64> = None;
    let mut secure = false;
    let mut http_only = false;
    let mut same_site = SameSite::Lax;

    for attr in parts {
        let attr = attr.trim();
        if attr.is_empty() {
            continue;
        }
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (attr, None),
        };

        match key.to_ascii_lowercase().as_str() {
            "domain" => {
                if let Some(v) = val {
                    let v = v.trim_start_matches('.');
                    if !v.is_empty() {
                        domain = Some(v.to_ascii_lowercase());
                    }
                }
            }
            "path" => {
                if let Some(v) = val.filter(|v| v.starts_with('/')) {
                    path = Some(v.to_string());
                }
            }
            "expires" => {
                if let Some(v) = val {
                    if let Some(ts) = parse_http_date(v) {
                        expires = Some(ts);
                    }
                }
            }
            "max-age" => {
                if let Some(v) = val.and_then(|v| v.parse::<i64>().ok()) {
                    max_age = Some(v);
                }
            }
            "secure" => secure = true,
            "httponly" => http_only = true,
            "samesite" => {
                same_site = match val.map(|v| v.to_ascii_lowercase()) {
                    Some(ref v) if v == "strict" => SameSite::Strict,
                    Some(ref v) if v == "none" => SameSite::None,
                    _ => SameSite::Lax,
                };
            }
            _ => {} // unrecognized attribute, ignored per RFC 6265 §5.2
        }
    }

    let effective_domain = match domain {
        Some(d) => {
            if !is_suffix_of_host(&d, request_host) {
                warn!(
                    "cookie parse: Domain={} is not a suffix of request host {}, dropping",
                    d, request_host
                );
                return None;
            }
            format!(".{d}")
        }
        None => request_host.to_string(), // host-only cookie
    };

    let effective_path = path.unwrap_or_else(|| default_path(request_path));

    // Max-Age overrides Expires when both present (spec §4.1).
    let expires_at = match max_age {
        Some(secs) => Some(now + secs), // negative max-age => immediate expiry
        None => expires,
    };

    Some(Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: effective_domain,
        path: effective_path,
        secure,
        http_only,
        same_site,
        expires_at,
        created_at: now,
    })
}

fn parse_name_value(segment: &str) -> Option<(&str, &str)> {
    let segment = segment.trim();
    let (name, value) = segment.split_once('=')?;
    Some((name.trim(), value.trim()))
}

/// `true` when `domain` equals `host` or is a dot-suffix of it — i.e. `host`
/// ends with `domain` on a label boundary.
fn is_suffix_of_host(domain: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    if host == domain {
        return true;
    }
    host.ends_with(&format!(".{domain}"))
}

/// Minimal HTTP-date parser covering the RFC 1123 form used by virtually
/// every `Set-Cookie: Expires=` in the wild
/// (`Wdy, DD Mon YYYY HH:MM:SS GMT`). Returns `None` for anything else rather
/// than guessing.
fn parse_http_date(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc2822(s)
        .map(|dt| dt.timestamp())
        .ok()
}

/// Serialize matched cookies into a `Cookie:` request header value (spec
/// §4.1 `serialize_header`).
pub fn serialize_header(cookies: &[&Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Render a stored `Cookie` back into a full `Set-Cookie` attribute string.
///
/// This is the inverse of [`parse_set_cookie`] and exists for the
/// persistence/export round-trip law (spec §8 L1): every attribute
/// `parse_set_cookie` understands is re-emitted so that re-parsing the
/// result against the same request host/path reproduces an equal `Cookie`
/// (`created_at` is the caller's `now`, matching the original parse call).
pub fn to_set_cookie_header(cookie: &Cookie) -> String {
    let mut out = format!("{}={}", cookie.name, cookie.value);

    // Only re-emit `Domain=` for cookies that were subdomain-inclusive; a
    // host-only cookie (no leading '.') must stay host-only on reparse.
    if let Some(suffix) = cookie.domain.strip_prefix('.') {
        out.push_str(&format!("; Domain={suffix}"));
    }
    out.push_str(&format!("; Path={}", cookie.path));
    if let Some(exp) = cookie.expires_at {
        out.push_str(&format!("; Max-Age={}", exp - cookie.created_at));
    }
    if cookie.secure {
        out.push_str("; Secure");
    }
    if cookie.http_only {
        out.push_str("; HttpOnly");
    }
    let same_site = match cookie.same_site {
        SameSite::None => "None",
        SameSite::Lax => "Lax",
        SameSite::Strict => "Strict",
    };
    out.push_str(&format!("; SameSite={same_site}"));
    out
}
