//! The per-session cookie store (spec §4.1).
//!
//! A `CookieJar` belongs to exactly one `Session` — jars are never shared,
//! which is the isolation guarantee the whole crate exists to provide
//! (spec §8 P4). Keyed by `(effective_domain, path, name)`, last-writer-wins,
//! insertion order irrelevant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Cookie, CookieKey};

/// Disjoint per-session cookie store.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: BTreeMap<CookieKey, Cookie>,
}

/// Serializable form for persistence (spec §4.4 snapshot schema: "cookies
/// (per session, flat list ...)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieJarSnapshot {
    pub cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by `(domain, path, name)`. A cookie whose expiry has already
    /// passed is accepted only to delete any prior match — it is never
    /// stored (spec §4.1 `store`, and §8 boundary: `Max-Age=0`).
    pub fn store(&mut self, cookie: Cookie, now: i64) {
        let key = CookieKey::of(&cookie);
        if cookie.is_expired(now) {
            self.cookies.remove(&key);
            return;
        }
        self.cookies.insert(key, cookie);
    }

    /// Exact-triple deletion (spec §4.1 `remove`).
    pub fn remove(&mut self, domain: &str, path: &str, name: &str) -> Option<Cookie> {
        let key = CookieKey {
            domain: domain.to_string(),
            path: path.to_string(),
            name: name.to_string(),
        };
        self.cookies.remove(&key)
    }

    /// Every cookie currently stored, regardless of match criteria. Used by
    /// the scrubber's ownership classification (spec §4.3.3/§4.3.4).
    pub fn all(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.values()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Select cookies applicable to a request, ordered longest-path-first
    /// then earliest-creation-time (spec §4.1 `match`).
    pub fn matching(&self, request_host: &str, request_path: &str, is_secure: bool, now: i64) -> Vec<&Cookie> {
        let mut matches: Vec<&Cookie> = self
            .cookies
            .values()
            .filter(|c| c.domain_matches(request_host))
            .filter(|c| c.path_matches(request_path))
            .filter(|c| !c.secure || is_secure)
            .filter(|c| !c.is_expired(now))
            .collect();

        matches.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        matches
    }

    /// Drop every cookie whose expiry has passed as of `now`. Invoked
    /// opportunistically by the background tick (spec §4.3.3 periodic sweep
    /// companion — cookie lifecycle "destroyed ... by expiry passing",
    /// spec §3 Lifecycles).
    pub fn sweep_expired(&mut self, now: i64) -> usize {
        let before = self.cookies.len();
        self.cookies.retain(|_, c| !c.is_expired(now));
        before - self.cookies.len()
    }

    pub fn snapshot(&self) -> CookieJarSnapshot {
        CookieJarSnapshot {
            cookies: self.cookies.values().cloned().collect(),
        }
    }

    pub fn restore(snapshot: CookieJarSnapshot) -> Self {
        let mut jar = Self::new();
        for cookie in snapshot.cookies {
            let key = CookieKey::of(&cookie);
            jar.cookies.insert(key, cookie);
        }
        jar
    }
}
