//! Restart reconciliation — URL-based re-binding of restored tabs to sessions
//! across host-process restarts, where tab identifiers are not stable (spec
//! §4.5).
//!
//! Pure matching logic lives here; the engine owns the retry-with-backoff
//! probing of `HostApi::query_tabs` (spec step 2: "if the first probe
//! returns empty, wait 1 s and retry; up to 3 probes total") and the 10-second
//! grace before `validate_and_cleanup` runs.

use chrono::{DateTime, Utc};

use crate::persistence::SessionRecord;
use crate::registry::SessionId;

/// `(scheme-less hostname + path)`, ignoring query string and fragment (spec
/// §4.5 step 3). Falls back to the raw string when the URL fails to parse —
/// such URLs simply won't match anything, which is the correct no-op outcome.
pub fn normalize_for_match(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("");
            format!("{host}{}", parsed.path())
        }
        Err(_) => url.to_string(),
    }
}

/// One restored tab awaiting reassociation, as reported by `query_tabs`.
pub struct RestoredTab<TabId> {
    pub tab_id: TabId,
    pub url: String,
}

/// The outcome of matching one restored tab against persisted sessions.
pub struct Binding<TabId> {
    pub tab_id: TabId,
    pub session_id: SessionId,
}

/// Match every restored tab to the best candidate persisted session (spec
/// §4.5 step 3): among sessions with a `tab_urls` entry whose normalized form
/// equals the restored tab's normalized URL, pick the one with the most
/// recent `last_accessed_at`.
///
/// A session already claimed by one restored tab remains eligible for
/// another — the spec does not say bindings are exclusive across tabs, only
/// that a tab binds to at most one session (spec §3 invariant).
pub fn match_restored_tabs<TabId: Copy>(
    restored: &[RestoredTab<TabId>],
    sessions: &[SessionRecord],
) -> Vec<Binding<TabId>> {
    let mut bindings = Vec::new();

    for tab in restored {
        let key = normalize_for_match(&tab.url);
        let best = sessions
            .iter()
            .filter(|s| s.tab_urls.iter().any(|u| normalize_for_match(u) == key))
            .max_by_key(|s| s.last_accessed_at);

        if let Some(session) = best {
            bindings.push(Binding {
                tab_id: tab.tab_id,
                session_id: session.id,
            });
        }
    }

    bindings
}

/// spec §4.5 step 5 `validate_and_cleanup`: classify what should happen to a
/// persisted-LIVE session that ended up with zero matched tabs after
/// reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Retire,
    StayDormant,
}

/// `age > retention_days` → retire; `None` (no retention cap for this tier)
/// always stays dormant (spec §4.5 step 5). `retention_days` comes from
/// `TierCaps::for_tier` so the cutoff has one source of truth shared with
/// spec §4.6's cap table, instead of being duplicated here.
pub fn classify_cleanup(
    retention_days: Option<u32>,
    last_accessed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CleanupOutcome {
    match retention_days {
        Some(days) if (now - last_accessed_at) > chrono::Duration::days(days as i64) => {
            CleanupOutcome::Retire
        }
        _ => CleanupOutcome::StayDormant,
    }
}

/// spec §4.5 tier gating: auto-rebinding only applies when `tier =
/// enterprise ∧ auto_restore_enabled`; otherwise persisted sessions survive
/// restart but their bindings are cleared (restored tabs behave as fresh,
/// unbound tabs).
pub fn auto_rebind_allowed(tier: crate::tier::Tier, auto_restore_enabled: bool) -> bool {
    tier == crate::tier::Tier::Enterprise && auto_restore_enabled
}

/// How many probe attempts `query_tabs` gets before the reconciler gives up
/// for this startup cycle (spec §4.5 step 2).
pub const MAX_TAB_QUERY_PROBES: u32 = 3;

/// Delay between probe attempts.
pub const TAB_QUERY_PROBE_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Grace period after binding restored tabs before `validate_and_cleanup`
/// runs (spec §4.5 step 5).
pub const VALIDATE_CLEANUP_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::Tier;
    use chrono::Duration as ChronoDuration;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct T(u64);

    fn record(id: SessionId, urls: &[&str], last_accessed: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            id,
            name: None,
            color_slot: 0,
            created_at: last_accessed,
            last_accessed_at: last_accessed,
            tab_urls: urls.iter().map(|s| s.to_string()).collect(),
            status: crate::registry::SessionStatus::Dormant,
        }
    }

    #[test]
    fn normalize_ignores_query_and_fragment() {
        assert_eq!(
            normalize_for_match("https://a.test/foo?q=1#frag"),
            normalize_for_match("https://a.test/foo")
        );
    }

    #[test]
    fn s4_restart_url_match_ignores_query_string() {
        let sid = SessionId::new();
        let now = Utc::now();
        let sessions = vec![record(sid, &["https://a.test/foo"], now)];
        let restored = vec![RestoredTab {
            tab_id: T(9999),
            url: "https://a.test/foo?q=1".to_string(),
        }];

        let bindings = match_restored_tabs(&restored, &sessions);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].tab_id, T(9999));
        assert_eq!(bindings[0].session_id, sid);
    }

    #[test]
    fn picks_most_recently_accessed_among_candidates() {
        let older = SessionId::new();
        let newer = SessionId::new();
        let now = Utc::now();
        let sessions = vec![
            record(older, &["https://a.test/x"], now - ChronoDuration::days(1)),
            record(newer, &["https://a.test/x"], now),
        ];
        let restored = vec![RestoredTab {
            tab_id: T(1),
            url: "https://a.test/x".to_string(),
        }];
        let bindings = match_restored_tabs(&restored, &sessions);
        assert_eq!(bindings[0].session_id, newer);
    }

    #[test]
    fn unmatched_tab_produces_no_binding() {
        let sid = SessionId::new();
        let now = Utc::now();
        let sessions = vec![record(sid, &["https://a.test/foo"], now)];
        let restored = vec![RestoredTab {
            tab_id: T(1),
            url: "https://b.test/bar".to_string(),
        }];
        assert!(match_restored_tabs(&restored, &sessions).is_empty());
    }

    #[test]
    fn s3_free_tier_retires_after_seven_days() {
        let now = Utc::now();
        let retention = crate::tier::TierCaps::for_tier(Tier::Free).dormant_retention_days;
        let outcome = classify_cleanup(retention, now - ChronoDuration::days(8), now);
        assert_eq!(outcome, CleanupOutcome::Retire);
    }

    #[test]
    fn free_tier_within_seven_days_stays_dormant() {
        let now = Utc::now();
        let retention = crate::tier::TierCaps::for_tier(Tier::Free).dormant_retention_days;
        let outcome = classify_cleanup(
            retention,
            now - ChronoDuration::hours(6 * 24 + 23),
            now,
        );
        assert_eq!(outcome, CleanupOutcome::StayDormant);
    }

    #[test]
    fn non_free_tiers_always_stay_dormant() {
        let now = Utc::now();
        let retention = crate::tier::TierCaps::for_tier(Tier::Enterprise).dormant_retention_days;
        let outcome = classify_cleanup(retention, now - ChronoDuration::days(400), now);
        assert_eq!(outcome, CleanupOutcome::StayDormant);
    }

    #[test]
    fn auto_rebind_requires_enterprise_and_flag() {
        assert!(auto_rebind_allowed(Tier::Enterprise, true));
        assert!(!auto_rebind_allowed(Tier::Enterprise, false));
        assert!(!auto_rebind_allowed(Tier::Premium, true));
        assert!(!auto_rebind_allowed(Tier::Free, true));
    }

    #[test]
    fn p5_reconciliation_is_idempotent() {
        let sid = SessionId::new();
        let now = Utc::now();
        let sessions = vec![record(sid, &["https://a.test/foo"], now)];
        let restored = vec![RestoredTab {
            tab_id: T(1),
            url: "https://a.test/foo".to_string(),
        }];

        let first = match_restored_tabs(&restored, &sessions);
        let second = match_restored_tabs(&restored, &sessions);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].session_id, second[0].session_id);
    }
}
