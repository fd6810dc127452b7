//! The cookie interception pipeline (spec §4.3).
//!
//! Three sub-handlers invoked by the host on its request/response/cookie-change
//! hooks, plus the shared-store scrubber. Kept as pure-ish functions over
//! `&mut SessionRegistry` / `&mut HashMap<SessionId, CookieJar>` so the engine
//! layer (`engine::SessionCore`) owns locking and I/O dispatch — the same split
//! the teacher keeps between `features/proxy_manager.rs::ProxyManager` (pure
//! selection logic) and its callers (locking, CDP calls).

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::cookie::jar::CookieJar;
use crate::cookie::parse::{parse_set_cookie, serialize_header};
use crate::host::{RawCookieRecord, TabId};
use crate::registry::{SessionId, SessionRegistry};

/// How a shared-store cookie was classified during a scrub pass (spec
/// §4.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrubVerdict {
    /// Belongs to the session currently occupying the tab it leaked into —
    /// keep, the page may still be mid-load.
    OwnedBySelf,
    /// Belongs to a different session's jar — delete, it has leaked.
    OwnedByOther,
    /// Not in any session's jar — ambient browsing, never touch.
    Ambient,
}

/// Host-reported URL split into the two fields the jar matches against.
pub struct RequestContext {
    pub host: String,
    pub path: String,
    pub is_secure: bool,
}

/// Parse a request URL into the host/path/secure triple the pipeline needs.
/// Malformed URLs are treated as non-matching (no cookies attached) rather
/// than failing the request — consistent with spec §4.1 "parse errors ...
/// never fail the surrounding request".
pub fn request_context(url: &str) -> Option<RequestContext> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let path = if parsed.path().is_empty() {
        "/".to_string()
    } else {
        parsed.path().to_string()
    };
    let is_secure = parsed.scheme() == "https";
    Some(RequestContext { host, path, is_secure })
}

/// §4.3.1 `on_before_send_headers`: strip any ambient `Cookie` header and
/// replace it with exactly the owning session's matching cookies.
///
/// Returns the rewritten header list unchanged when `tab_id` has no bound
/// session (spec step 1).
pub fn rewrite_request_headers(
    registry: &SessionRegistry,
    jars: &HashMap<SessionId, CookieJar>,
    tab_id: TabId,
    url: &str,
    headers: Vec<(String, String)>,
    now: i64,
) -> Vec<(String, String)> {
    let Some(session_id) = registry.session_for_tab(tab_id) else {
        return headers;
    };
    let Some(jar) = jars.get(&session_id) else {
        return headers;
    };
    let Some(ctx) = request_context(url) else {
        return headers;
    };

    let matches = jar.matching(&ctx.host, &ctx.path, ctx.is_secure, now);

    let mut rewritten: Vec<(String, String)> = headers
        .into_iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("cookie"))
        .collect();

    if !matches.is_empty() {
        rewritten.push(("Cookie".to_string(), serialize_header(&matches)));
    }
    rewritten
}

/// §4.3.2 `on_headers_received`: parse every `Set-Cookie` value into the
/// owning session's jar. Returns `true` when at least one cookie was stored
/// — the caller uses this to decide whether to schedule the delayed scrub
/// (spec step 3) and a debounced persistence flush (step 4).
pub fn capture_response_headers(
    registry: &SessionRegistry,
    jars: &mut HashMap<SessionId, CookieJar>,
    tab_id: TabId,
    url: &str,
    headers: &[(String, String)],
    now: i64,
) -> bool {
    let Some(session_id) = registry.session_for_tab(tab_id) else {
        return false;
    };
    let Some(ctx) = request_context(url) else {
        return false;
    };
    let jar = jars.entry(session_id).or_default();

    let mut stored_any = false;
    for (name, value) in headers {
        if !name.eq_ignore_ascii_case("set-cookie") {
            continue;
        }
        match parse_set_cookie(value, &ctx.host, &ctx.path, now) {
            Some(cookie) => {
                jar.store(cookie, now);
                stored_any = true;
            }
            None => {
                // parse_set_cookie already warned internally for the reject
                // case; this covers the rest of the "malformed" surface.
                debug!("pipeline: dropped unparseable Set-Cookie on {}", ctx.host);
            }
        }
    }
    stored_any
}

/// §4.3.3 classification: decide what a single shared-store cookie found on
/// `host` should become, given the jar of the session whose tab currently
/// occupies that host and the full jar set (to detect "owned by some other
/// session").
///
/// `occupying_session` is the session bound to the tab the scrub is running
/// for. The shared cookie is matched against jars by `(domain, path, name)`
/// identity — the same triple the jar is keyed by — rather than trusting any
/// domain field the host reports (spec §4.3.4: "the host may report an empty
/// domain field").
pub fn classify_shared_cookie(
    jars: &HashMap<SessionId, CookieJar>,
    occupying_session: SessionId,
    domain: &str,
    path: &str,
    name: &str,
) -> ScrubVerdict {
    let owner = jars.iter().find(|(_, jar)| {
        jar.all()
            .any(|c| c.domain == domain && c.path == path && c.name == name)
    });

    match owner {
        Some((owner_id, _)) if *owner_id == occupying_session => ScrubVerdict::OwnedBySelf,
        Some(_) => ScrubVerdict::OwnedByOther,
        None => ScrubVerdict::Ambient,
    }
}

/// Result of one `scrub_shared_store` pass over a single host, for callers
/// that want to log/count what happened.
#[derive(Debug, Default)]
pub struct ScrubReport {
    pub kept_self: usize,
    pub deleted_leaked: usize,
    pub kept_ambient: usize,
}

/// §4.3.3 `scrub_shared_store` for one host: iterate the shared cookies the
/// host reports for `host`, classify each against the jar of the session
/// occupying a tab on that host, and return which to delete.
///
/// This function is pure — it does not call `HostApi::remove_shared_cookie`
/// itself. The caller (engine) performs the deletion and logs the report,
/// the same split kept between `pipeline::rewrite_request_headers` (decide)
/// and the event-loop dispatcher (act).
pub fn scrub_host(
    jars: &HashMap<SessionId, CookieJar>,
    occupying_session: SessionId,
    shared_cookies: &[(String, String, String)], // (domain, path, name)
) -> (ScrubReport, Vec<(String, String, String)>) {
    let mut report = ScrubReport::default();
    let mut to_delete = Vec::new();

    for (domain, path, name) in shared_cookies {
        match classify_shared_cookie(jars, occupying_session, domain, path, name) {
            ScrubVerdict::OwnedBySelf => report.kept_self += 1,
            ScrubVerdict::Ambient => report.kept_ambient += 1,
            ScrubVerdict::OwnedByOther => {
                report.deleted_leaked += 1;
                to_delete.push((domain.clone(), path.clone(), name.clone()));
            }
        }
    }

    (report, to_delete)
}

/// §4.3.4 script-origin capture: classify a single cookie-changed event
/// reported by the host. Unlike response capture, this path never writes
/// into a jar — it only decides whether the shared-store copy should be
/// scrubbed (spec: "this handler is purely a scrubber").
///
/// Per-tab probing (spec step 1: "iterate session tabs and consult the
/// shared store per-tab") is the engine's job, since it requires awaiting
/// `HostApi::list_shared_cookies` per tab; this function takes the
/// already-resolved occupying session for one such probe, plus the domain
/// of the matching `Cookie` the probe found in the shared store.
///
/// `record.domain` is never used for classification: the host may report it
/// empty (spec §4.3.4 step 1), so the domain that drives the ownership
/// match must come from the shared-store cookie the caller already matched
/// on name/path, not from the raw event.
pub fn classify_cookie_change(
    jars: &HashMap<SessionId, CookieJar>,
    occupying_session: SessionId,
    record: &RawCookieRecord,
    resolved_domain: &str,
) -> ScrubVerdict {
    if record.domain.is_empty() {
        warn!(
            "pipeline: cookie-changed event for '{}' on {} has empty domain field, \
             using per-tab-probed domain '{resolved_domain}' for classification",
            record.name, record.host
        );
    }
    classify_shared_cookie(jars, occupying_session, resolved_domain, &record.path, &record.name)
}
