//! Licensing-tier caps and feature gates (spec §4.6).
//!
//! The tier/auto-restore oracle itself is an external collaborator (spec §1
//! "out of scope"); this module only defines the trait seam
//! (`TierOracle`, the teacher's `SearchService`-style async trait boundary —
//! see `tools/search/mod.rs`) and the pure cap table derived from its
//! answer.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Debounce window for oracle flapping (spec §4.6).
pub const TIER_CHANGE_DEBOUNCE: ChronoDuration = ChronoDuration::seconds(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Free,
    Premium,
    Enterprise,
}

/// The external licensing oracle (spec §1, §4.6 "Inputs").
#[async_trait]
pub trait TierOracle: Send + Sync {
    async fn tier(&self) -> anyhow::Result<Tier>;
    async fn auto_restore_enabled(&self) -> anyhow::Result<bool>;
}

/// Caps and feature gates derived from tier (spec §4.6 "Caps" table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierCaps {
    pub max_live_sessions: Option<usize>,
    pub dormant_retention_days: Option<u32>,
    pub naming_allowed: bool,
    pub export_allowed: bool,
    pub export_encrypted: bool,
    pub auto_restore_allowed: bool,
    pub max_devices: u32,
}

impl TierCaps {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => TierCaps {
                max_live_sessions: Some(3),
                dormant_retention_days: Some(7),
                naming_allowed: false,
                export_allowed: false,
                export_encrypted: false,
                auto_restore_allowed: false,
                max_devices: 1,
            },
            Tier::Premium => TierCaps {
                max_live_sessions: None,
                dormant_retention_days: None,
                naming_allowed: true,
                export_allowed: true,
                export_encrypted: false,
                auto_restore_allowed: false,
                max_devices: 1,
            },
            Tier::Enterprise => TierCaps {
                max_live_sessions: None,
                dormant_retention_days: None,
                naming_allowed: true,
                export_allowed: true,
                export_encrypted: true,
                auto_restore_allowed: true,
                max_devices: 3,
            },
        }
    }
}

/// Debounced view of the oracle's last answer (spec §4.6 "apply after a
/// 5-second debounce to tolerate oracle flapping"). Mirrors the
/// last-write-wins coalescing-timestamp shape the teacher uses for its
/// proxy-switch cooldown (`features/proxy_manager.rs::should_use_sticky_proxy`).
#[derive(Debug, Clone)]
pub struct TierState {
    pub tier: Tier,
    pub auto_restore_enabled: bool,
    pending: Option<(Tier, bool, DateTime<Utc>)>,
}

impl TierState {
    pub fn new(tier: Tier, auto_restore_enabled: bool) -> Self {
        Self {
            tier,
            auto_restore_enabled,
            pending: None,
        }
    }

    pub fn caps(&self) -> TierCaps {
        TierCaps::for_tier(self.tier)
    }

    /// Record a fresh oracle reading. Starts a debounce window the first
    /// time the value differs from what's committed; a repeat of the same
    /// pending reading on a later tick leaves the original window's start
    /// time alone (only a reading that changes AGAIN restarts it) — call
    /// [`Self::apply_if_due`] on every tick to commit once the window has
    /// elapsed without a further change cancelling it. Returns `true` if the
    /// reading started a new pending window.
    pub fn observe(&mut self, tier: Tier, auto_restore_enabled: bool, now: DateTime<Utc>) -> bool {
        if tier == self.tier && auto_restore_enabled == self.auto_restore_enabled {
            self.pending = None;
            return false;
        }
        if let Some((pending_tier, pending_auto_restore, _)) = self.pending {
            if pending_tier == tier && pending_auto_restore == auto_restore_enabled {
                return false;
            }
        }
        self.pending = Some((tier, auto_restore_enabled, now));
        true
    }

    /// Commit the pending reading if its debounce window has elapsed.
    /// Returns `true` when a tier change was committed this call. On
    /// downgrade from Enterprise, `auto_restore_enabled` is forcibly cleared
    /// regardless of what the oracle reported (spec §4.6).
    ///
    /// `debounce` is the caller's configured window (`SessionCoreConfig::tier_change_debounce`,
    /// spec §4.6's 5 s by default) rather than a hard-coded constant, so tests
    /// can shrink it the same way they shrink `scrub_delay`/`cookie_write_debounce`.
    pub fn apply_if_due(&mut self, now: DateTime<Utc>, debounce: ChronoDuration) -> bool {
        let Some((tier, auto_restore, started)) = self.pending else {
            return false;
        };
        if now - started < debounce {
            return false;
        }
        let downgraded_from_enterprise = self.tier == Tier::Enterprise && tier != Tier::Enterprise;
        self.tier = tier;
        self.auto_restore_enabled = if downgraded_from_enterprise {
            false
        } else {
            auto_restore
        };
        self.pending = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_caps_match_spec() {
        let caps = TierCaps::for_tier(Tier::Free);
        assert_eq!(caps.max_live_sessions, Some(3));
        assert_eq!(caps.dormant_retention_days, Some(7));
        assert!(!caps.naming_allowed);
        assert!(!caps.export_allowed);
        assert!(!caps.auto_restore_allowed);
    }

    #[test]
    fn enterprise_caps_allow_auto_restore_and_encrypted_export() {
        let caps = TierCaps::for_tier(Tier::Enterprise);
        assert_eq!(caps.max_live_sessions, None);
        assert!(caps.auto_restore_allowed);
        assert!(caps.export_encrypted);
        assert_eq!(caps.max_devices, 3);
    }

    #[test]
    fn tier_change_requires_debounce_to_elapse() {
        let mut state = TierState::new(Tier::Enterprise, true);
        let t0 = Utc::now();
        assert!(state.observe(Tier::Free, true, t0));

        // Not yet due.
        assert!(!state.apply_if_due(t0 + ChronoDuration::seconds(2), TIER_CHANGE_DEBOUNCE));
        assert_eq!(state.tier, Tier::Enterprise);

        // Due.
        assert!(state.apply_if_due(t0 + ChronoDuration::seconds(6), TIER_CHANGE_DEBOUNCE));
        assert_eq!(state.tier, Tier::Free);
    }

    #[test]
    fn downgrade_from_enterprise_clears_auto_restore() {
        let mut state = TierState::new(Tier::Enterprise, true);
        let t0 = Utc::now();
        state.observe(Tier::Premium, true, t0);
        state.apply_if_due(t0 + ChronoDuration::seconds(6), TIER_CHANGE_DEBOUNCE);
        assert_eq!(state.tier, Tier::Premium);
        assert!(!state.auto_restore_enabled);
    }

    #[test]
    fn repeated_identical_reading_does_not_restart_debounce_window() {
        let mut state = TierState::new(Tier::Enterprise, true);
        let t0 = Utc::now();
        assert!(state.observe(Tier::Premium, false, t0));
        // Same steady-state reading observed again on a later tick, as
        // `on_periodic_tick` does every cycle — must not push the window out.
        assert!(!state.observe(Tier::Premium, false, t0 + ChronoDuration::seconds(3)));
        assert!(state.apply_if_due(t0 + ChronoDuration::seconds(6), TIER_CHANGE_DEBOUNCE));
        assert_eq!(state.tier, Tier::Premium);
    }

    #[test]
    fn flapping_oracle_cancels_pending_change() {
        let mut state = TierState::new(Tier::Free, false);
        let t0 = Utc::now();
        state.observe(Tier::Premium, false, t0);
        // Oracle flaps back before the debounce elapses.
        state.observe(Tier::Free, false, t0 + ChronoDuration::seconds(1));
        assert!(!state.apply_if_due(t0 + ChronoDuration::seconds(6), TIER_CHANGE_DEBOUNCE));
        assert_eq!(state.tier, Tier::Free);
    }
}
