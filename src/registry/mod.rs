//! Session registry & tab-binding state machine (spec §4.2).
//!
//! Owns the set of `Session` records and the tab↔session map, and enforces
//! the lifecycle transitions from spec §3/§4.2. Mirrors the ownership shape
//! of the teacher's `features/proxy_manager.rs::ProxyManager` (a struct
//! wrapping its registry behind a lock, with narrow accessor methods) but
//! keeps the lock at the `engine::SessionCore` layer — this type itself is
//! plain, synchronous, and takes the current time as an explicit parameter
//! so it is deterministically testable (spec §8 boundary behaviors around
//! the 100 ms `is_being_created` window).

pub mod color;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, InvalidNameReason};
use crate::host::TabId;
use crate::tier::Tier;

/// Window during which listener-driven `last_accessed` bumps are suppressed
/// (spec §4.2 "is_being_created window").
pub const CREATION_GRACE: ChronoDuration = ChronoDuration::milliseconds(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A session's place in the lifecycle state machine (spec §4.2). `Retired`
/// is terminal and is not represented here — a retired session is simply
/// absent from `SessionRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Live,
    Dormant,
}

/// What the owning policy says should happen when a session's last tab
/// closes (spec §4.2 transitions, driven by `tier::TierPolicy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetirementPolicy {
    /// tier = free, or tier ∈ {premium, enterprise} without auto-restore.
    PreserveDormant,
    /// tier = enterprise ∧ auto-restore enabled.
    Ephemeral,
}

/// Outcome of an operation that can change a session's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
    BecameDormant,
    Retired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: Option<String>,
    pub color_slot: u8,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub tabs: BTreeSet<TabId>,
    pub status: SessionStatus,
    /// Cleared after [`CREATION_GRACE`] or on first explicit user
    /// interaction, whichever is sooner (spec §4.2).
    #[serde(skip)]
    creation_started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_being_created(&self, now: DateTime<Utc>) -> bool {
        match self.creation_started_at {
            Some(started) => now - started < CREATION_GRACE,
            None => false,
        }
    }
}

/// Serializable tab metadata tracked per live tab for restart reconciliation
/// and diagnostics (spec §3 `TabMetadata`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TabMetadata {
    pub last_seen_url: Option<String>,
    pub last_seen_title: Option<String>,
    pub last_seen_favicon: Option<String>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    tab_bindings: HashMap<TabId, SessionId>,
    tab_metadata: HashMap<TabId, TabMetadata>,
    color_slots: usize,
}

impl SessionRegistry {
    pub fn new(color_slots: usize) -> Self {
        Self {
            color_slots: color_slots.max(1),
            ..Default::default()
        }
    }

    /// Allocate a new LIVE session with a zero-tab record and
    /// `is_being_created = true`. Caller binds the initiating tab separately
    /// via [`Self::bind_tab`] once the host has opened it (spec §4.2
    /// `create_session`: "opens a new tab bound to it").
    pub fn create_session(
        &mut self,
        now: DateTime<Utc>,
        live_cap: Option<usize>,
        tier: Tier,
    ) -> Result<SessionId, CoreError> {
        if let Some(limit) = live_cap {
            let current = self.live_session_count();
            if current >= limit {
                return Err(CoreError::OverSessionLimit {
                    tier,
                    limit,
                    current,
                });
            }
        }

        let id = SessionId::new();
        let color_slot = self.pick_color_slot(&id.to_string());
        self.sessions.insert(
            id,
            Session {
                id,
                name: None,
                color_slot,
                created_at: now,
                last_accessed_at: now,
                tabs: BTreeSet::new(),
                status: SessionStatus::Live,
                creation_started_at: Some(now),
            },
        );
        Ok(id)
    }

    /// Pick a color slot for a not-yet-inserted session (spec §3 invariant:
    /// "two sessions may share a color only once all 12 slots are in use").
    /// Starts from the id's hash-derived preferred slot and, if that slot is
    /// already held by an existing session, probes forward for the first
    /// free one. Only returns a slot already in use when every slot is.
    fn pick_color_slot(&self, session_id: &str) -> u8 {
        let preferred = color::color_slot(session_id, self.color_slots);
        let used: std::collections::HashSet<u8> = self.sessions.values().map(|s| s.color_slot).collect();
        if used.len() >= self.color_slots || !used.contains(&preferred) {
            return preferred;
        }
        (1..self.color_slots)
            .map(|offset| ((preferred as usize + offset) % self.color_slots) as u8)
            .find(|candidate| !used.contains(candidate))
            .unwrap_or(preferred)
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Live)
            .count()
    }

    /// Bind `tab_id` to `session_id`. A no-op when the tab is already bound
    /// to *any* session — required for opener/navigation dual-path
    /// inheritance idempotency (spec §4.2, §9). Returns `true` when a new
    /// binding was created.
    pub fn bind_tab(&mut self, tab_id: TabId, session_id: SessionId, now: DateTime<Utc>) -> bool {
        if self.tab_bindings.contains_key(&tab_id) {
            return false;
        }
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        session.tabs.insert(tab_id);
        session.status = SessionStatus::Live;
        if !session.is_being_created(now) {
            session.last_accessed_at = now;
        }
        self.tab_bindings.insert(tab_id, session_id);
        true
    }

    pub fn session_for_tab(&self, tab_id: TabId) -> Option<SessionId> {
        self.tab_bindings.get(&tab_id).copied()
    }

    /// Remove the binding. If the owning session's tab set becomes empty,
    /// applies `policy` to decide DORMANT vs RETIRED (spec §4.2).
    pub fn unbind_tab(
        &mut self,
        tab_id: TabId,
        policy: RetirementPolicy,
    ) -> Option<LifecycleTransition> {
        let session_id = self.tab_bindings.remove(&tab_id)?;
        self.tab_metadata.remove(&tab_id);
        let session = self.sessions.get_mut(&session_id)?;
        session.tabs.remove(&tab_id);

        if !session.tabs.is_empty() {
            return None;
        }

        match policy {
            RetirementPolicy::PreserveDormant => {
                session.status = SessionStatus::Dormant;
                Some(LifecycleTransition::BecameDormant)
            }
            RetirementPolicy::Ephemeral => {
                self.sessions.remove(&session_id);
                Some(LifecycleTransition::Retired)
            }
        }
    }

    /// Bump `last_accessed_at` unless the session is within its creation
    /// grace window (spec §4.2).
    pub fn bump_last_accessed(&mut self, session_id: SessionId, now: DateTime<Utc>) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            if !session.is_being_created(now) {
                session.last_accessed_at = now;
            }
        }
    }

    /// Clear the creation grace window immediately — first explicit user
    /// interaction (spec §4.2).
    pub fn mark_interacted(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.creation_started_at = None;
        }
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn tab_bindings(&self) -> impl Iterator<Item = (&TabId, &SessionId)> {
        self.tab_bindings.iter()
    }

    pub fn update_tab_metadata(&mut self, tab_id: TabId, metadata: TabMetadata) {
        self.tab_metadata.insert(tab_id, metadata);
    }

    pub fn tab_metadata(&self, tab_id: TabId) -> Option<&TabMetadata> {
        self.tab_metadata.get(&tab_id)
    }

    /// Premium+ only — validated, case-insensitive-unique display name
    /// (spec §4.2 `set_name`).
    pub fn set_name(
        &mut self,
        session_id: SessionId,
        name: String,
        naming_allowed: bool,
    ) -> Result<(), CoreError> {
        if !naming_allowed {
            return Err(CoreError::InvalidName {
                reason: InvalidNameReason::NamingNotAllowedForTier,
            });
        }
        validate_name(&name)?;
        if self.name_taken(&name, Some(session_id)) {
            return Err(CoreError::InvalidName {
                reason: InvalidNameReason::DuplicateCaseInsensitive,
            });
        }
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.name = Some(name);
        }
        Ok(())
    }

    pub fn clear_name(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.name = None;
        }
    }

    fn name_taken(&self, candidate: &str, excluding: Option<SessionId>) -> bool {
        self.sessions.values().any(|s| {
            Some(s.id) != excluding
                && s
                    .name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(candidate))
        })
    }

    /// Only permitted when the session has zero tabs (spec §4.2
    /// `delete_dormant`).
    pub fn delete_dormant(&mut self, session_id: SessionId) -> Result<(), CoreError> {
        match self.sessions.get(&session_id) {
            Some(session) if session.tabs.is_empty() => {
                self.sessions.remove(&session_id);
                Ok(())
            }
            Some(_) => Err(CoreError::Fatal {
                message: "delete_dormant called on a session with live tabs".to_string(),
            }),
            None => Ok(()), // already gone; idempotent
        }
    }

    pub fn retire(&mut self, session_id: SessionId) {
        self.sessions.remove(&session_id);
    }

    /// Reconstruct a session from a persisted record (spec §4.5 step 1:
    /// "Restore Sessions and CookieJars unconditionally"). Always lands
    /// DORMANT with zero tabs — tab bindings are re-established separately
    /// by [`Self::bind_tab`] once the reconciler has matched restored tabs
    /// to sessions by URL.
    pub fn restore_session(&mut self, record: crate::persistence::SessionRecord) {
        self.sessions.insert(
            record.id,
            Session {
                id: record.id,
                name: record.name,
                color_slot: record.color_slot,
                created_at: record.created_at,
                last_accessed_at: record.last_accessed_at,
                tabs: BTreeSet::new(),
                status: SessionStatus::Dormant,
                creation_started_at: None,
            },
        );
    }

    /// Insert a session carried over from an export bundle (spec §6 "Import
    /// performs duplicate-name auto-rename"). Starts DORMANT with zero tabs,
    /// same as a restored session — the caller has already resolved any name
    /// collision before calling this.
    pub fn import_session(&mut self, name: Option<String>, now: DateTime<Utc>) -> SessionId {
        let id = SessionId::new();
        let color_slot = self.pick_color_slot(&id.to_string());
        self.sessions.insert(
            id,
            Session {
                id,
                name,
                color_slot,
                created_at: now,
                last_accessed_at: now,
                tabs: BTreeSet::new(),
                status: SessionStatus::Dormant,
                creation_started_at: None,
            },
        );
        id
    }

    /// Lower-cased display names of every live session, for import-time
    /// collision checks (spec §6 auto-rename; mirrors [`Self::name_taken`]'s
    /// case-insensitive comparison).
    pub fn live_name_set(&self) -> std::collections::HashSet<String> {
        self.sessions
            .values()
            .filter_map(|s| s.name.as_ref())
            .map(|n| n.to_ascii_lowercase())
            .collect()
    }
}

/// 1..50 grapheme clusters, no angle brackets/quotes/backtick (spec §4.2).
/// Grapheme-cluster counting is approximated with `chars().count()` —
/// sufficient for the ASCII-dominant session-name use case and avoids
/// pulling in a segmentation crate the teacher does not otherwise carry.
fn validate_name(name: &str) -> Result<(), CoreError> {
    let len = name.chars().count();
    if len == 0 {
        return Err(CoreError::InvalidName {
            reason: InvalidNameReason::TooShort,
        });
    }
    if len > 50 {
        return Err(CoreError::InvalidName {
            reason: InvalidNameReason::TooLong,
        });
    }
    if name.chars().any(|c| matches!(c, '<' | '>' | '"' | '\'' | '`')) {
        return Err(CoreError::InvalidName {
            reason: InvalidNameReason::DisallowedCharacter,
        });
    }
    Ok(())
}
