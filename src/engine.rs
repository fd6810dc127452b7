//! `SessionCore` — the top-level owner that wires the registry, jars,
//! interception pipeline, persistence store, tier policy, and reconciler
//! together and dispatches `HostEvent`s (spec §2 "Control flow", SPEC_FULL
//! §2 crate-level module map).
//!
//! Mirrors the ownership shape the teacher uses for `AppState`
//! (`core/app_state.rs`): a handful of `Arc`-held collaborators plus one lock
//! around the mutable graph, constructed once and shared behind an `Arc`
//! (the same shape `PersistenceStore` already uses for its own background
//! flush task). Event dispatch takes the single `state` lock for the
//! duration of each handler and releases it before any host I/O, matching
//! spec §5's "no internal task parallelism" for the registry/jar graph while
//! still letting deferred tasks (3 s scrub, 60 s tick, debounced writes) run
//! as separate `tokio::spawn`ed futures — the same split the teacher keeps
//! between its CDP event pump (`scraping/browser_manager.rs`) and the
//! request handlers that drive it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use backoff::backoff::Backoff;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SessionCoreConfig;
use crate::cookie::jar::CookieJar;
use crate::error::CoreError;
use crate::export::{self, ExportBundle, ExportedSession};
use crate::host::{HostApi, HostEvent, RawCookieRecord, TabId};
use crate::persistence::{DeviceMetadata, PersistenceStore, Snapshot};
use crate::pipeline::{self, ScrubVerdict};
use crate::registry::{RetirementPolicy, SessionId, SessionRegistry, SessionStatus, TabMetadata};
use crate::reconciler;
use crate::tier::{Tier, TierOracle, TierState};

struct CoreState {
    registry: SessionRegistry,
    jars: HashMap<SessionId, CookieJar>,
    tier: TierState,
    device_fingerprint: String,
}

/// Fixed retry ladder for `HostApi` read calls (spec §6 ADDED, §7): 100 ms,
/// 500 ms, 1 s, 2 s, 3 s. Not exponential — the host's own failure modes
/// (extension message-passing hiccups) don't follow a clean backoff curve,
/// so the ladder is hand-specified rather than built from
/// `ExponentialBackoffBuilder` the way the teacher's scrape retries are
/// (`tools/scrape.rs`).
struct FixedLadder(std::vec::IntoIter<StdDuration>);

impl FixedLadder {
    fn new() -> Self {
        Self(
            [100u64, 500, 1000, 2000, 3000]
                .into_iter()
                .map(StdDuration::from_millis)
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }
}

impl Backoff for FixedLadder {
    fn next_backoff(&mut self) -> Option<StdDuration> {
        self.0.next()
    }
    fn reset(&mut self) {}
}

/// Wrap a `HostApi` read call with the fixed retry ladder (spec §6 ADDED).
async fn retry_host_read<T, F, Fut>(f: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    backoff::future::retry(FixedLadder::new(), || async { f().await.map_err(backoff::Error::transient) }).await
}

/// The engine's public handle. Cheap to clone via `Arc`; every mutating
/// method takes `&Arc<Self>` because several of them spawn deferred
/// background work that needs to outlive the call (§4.3.3 delayed scrub,
/// §4.4 debounced writes).
pub struct SessionCore {
    state: Mutex<CoreState>,
    host: Arc<dyn HostApi>,
    persistence: Arc<PersistenceStore>,
    tier_oracle: Arc<dyn TierOracle>,
    config: SessionCoreConfig,
}

impl SessionCore {
    pub fn new(
        host: Arc<dyn HostApi>,
        persistence: Arc<PersistenceStore>,
        tier_oracle: Arc<dyn TierOracle>,
        config: SessionCoreConfig,
        initial_tier: Tier,
        initial_auto_restore: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CoreState {
                registry: SessionRegistry::new(12),
                jars: HashMap::new(),
                tier: TierState::new(initial_tier, initial_auto_restore),
                device_fingerprint: Uuid::new_v4().to_string(),
            }),
            host,
            persistence,
            tier_oracle,
            config,
        })
    }

    /// Dispatch one host event (spec §6 "Host event inputs"). Returns the
    /// rewritten header list for the two hook events that carry one;
    /// `None` for every other event.
    pub async fn handle_event(
        self: &Arc<Self>,
        event: HostEvent,
    ) -> Option<Vec<(String, String)>> {
        match event {
            HostEvent::BeforeSendHeaders { tab_id, url, headers } => {
                let state = self.state.lock().await;
                let now = Utc::now().timestamp();
                Some(pipeline::rewrite_request_headers(
                    &state.registry,
                    &state.jars,
                    tab_id,
                    &url,
                    headers,
                    now,
                ))
            }
            HostEvent::HeadersReceived { tab_id, url, headers } => {
                let stored = {
                    let mut state = self.state.lock().await;
                    let now = Utc::now().timestamp();
                    pipeline::capture_response_headers(
                        &state.registry,
                        &mut state.jars,
                        tab_id,
                        &url,
                        &headers,
                        now,
                    )
                };
                if stored {
                    if let Some(ctx) = pipeline::request_context(&url) {
                        self.schedule_delayed_scrub(ctx.host);
                    }
                    self.persist(false).await;
                }
                // Spec §4.3.2 step 5: the host does not permit blocking
                // response rewrite, so headers pass through unchanged.
                Some(headers)
            }
            HostEvent::CookieChanged { cookie, removed } => {
                self.handle_cookie_changed(cookie, removed).await;
                None
            }
            HostEvent::TabCreated { tab_id, opener_tab_id } => {
                if let Some(opener) = opener_tab_id {
                    self.inherit_session(opener, tab_id).await;
                }
                None
            }
            HostEvent::TabNavigatedFrom { source_tab_id, target_tab_id } => {
                self.inherit_session(source_tab_id, target_tab_id).await;
                None
            }
            HostEvent::TabRemoved { tab_id } => {
                self.handle_tab_removed(tab_id).await;
                None
            }
            HostEvent::TabActivated { tab_id } => {
                let mut state = self.state.lock().await;
                if let Some(sid) = state.registry.session_for_tab(tab_id) {
                    let now = Utc::now();
                    state.registry.bump_last_accessed(sid, now);
                }
                None
            }
            HostEvent::TabUpdated { tab_id, new_url } => {
                let mut state = self.state.lock().await;
                if let Some(sid) = state.registry.session_for_tab(tab_id) {
                    let now = Utc::now();
                    state.registry.bump_last_accessed(sid, now);
                    state.registry.update_tab_metadata(
                        tab_id,
                        TabMetadata {
                            last_seen_url: Some(new_url),
                            ..Default::default()
                        },
                    );
                }
                None
            }
            HostEvent::PeriodicTick => {
                self.on_periodic_tick().await;
                None
            }
        }
    }

    /// Spec §4.2 `create_session`: checks the tier cap, allocates the
    /// record, opens the initiating tab, and binds it.
    pub async fn create_session(
        self: &Arc<Self>,
        initial_url: Option<&str>,
    ) -> Result<SessionId, CoreError> {
        let now = Utc::now();
        let sid = {
            let mut state = self.state.lock().await;
            let tier = state.tier.tier;
            let cap = state.tier.caps().max_live_sessions;
            state.registry.create_session(now, cap, tier)?
        };

        let tab_id = self
            .host
            .open_tab(initial_url.unwrap_or("about:blank"))
            .await
            .map_err(|e| CoreError::HostUnavailable { message: e.to_string() })?;

        let color_slot = {
            let mut state = self.state.lock().await;
            state.registry.bind_tab(tab_id, sid, now);
            state.registry.get(sid).map(|s| s.color_slot).unwrap_or(0)
        };
        if let Err(e) = self.host.set_tab_badge(tab_id, color_slot, "\u{25cf}").await {
            warn!("engine: failed to set tab badge for new session: {e}");
        }

        self.persist(true).await;
        Ok(sid)
    }

    /// Spec §4.2 `set_name` — Premium+ only.
    pub async fn set_name(&self, session_id: SessionId, name: String) -> Result<(), CoreError> {
        {
            let mut state = self.state.lock().await;
            let naming_allowed = state.tier.caps().naming_allowed;
            state.registry.set_name(session_id, name, naming_allowed)?;
        }
        self.persist(false).await;
        Ok(())
    }

    pub async fn clear_name(&self, session_id: SessionId) {
        {
            let mut state = self.state.lock().await;
            state.registry.clear_name(session_id);
        }
        self.persist(false).await;
    }

    /// Spec §4.2 `delete_dormant`.
    pub async fn delete_dormant(&self, session_id: SessionId) -> Result<(), CoreError> {
        {
            let mut state = self.state.lock().await;
            state.registry.delete_dormant(session_id)?;
            state.jars.remove(&session_id);
        }
        self.persist(true).await;
        Ok(())
    }

    /// Spec §6 export wire format, gated by `TierCaps::export_allowed`.
    pub async fn export_sessions(
        &self,
        session_ids: &[SessionId],
        passphrase: Option<&str>,
    ) -> Result<Vec<u8>, CoreError> {
        let (bundle, tier) = {
            let state = self.state.lock().await;
            let tier = state.tier.tier;
            let sessions = session_ids
                .iter()
                .filter_map(|id| {
                    let session = state.registry.get(*id)?;
                    let cookies = state.jars.get(id).map(|j| j.all().cloned().collect()).unwrap_or_default();
                    Some(ExportedSession { name: session.name.clone(), cookies })
                })
                .collect();
            (ExportBundle { sessions }, tier)
        };
        export::encode(&bundle, tier, passphrase)
    }

    /// Spec §6 import, with duplicate-name auto-rename (spec: "append
    /// \" (imported)\", \" (imported 2)\", …").
    pub async fn import_sessions(&self, bytes: &[u8], passphrase: Option<&str>) -> Result<Vec<SessionId>, CoreError> {
        let bundle = export::decode(bytes, passphrase)?;
        let now = Utc::now();
        let mut imported = Vec::with_capacity(bundle.sessions.len());
        {
            let mut state = self.state.lock().await;
            for session in bundle.sessions {
                let mut existing = state.registry.live_name_set();
                let name = session.name.map(|n| {
                    let resolved = export::dedupe_import_name(&existing, &n);
                    existing.insert(resolved.to_ascii_lowercase());
                    resolved
                });
                let sid = state.registry.import_session(name, now);
                let mut jar = CookieJar::new();
                let now_ts = now.timestamp();
                for cookie in session.cookies {
                    jar.store(cookie, now_ts);
                }
                state.jars.insert(sid, jar);
                imported.push(sid);
            }
        }
        self.persist(true).await;
        Ok(imported)
    }

    /// Spec §4.5 `RestartReconciler` procedure, run once at startup.
    pub async fn reconcile_after_restart(self: &Arc<Self>) {
        let snapshot = match self.persistence.load().await {
            Ok(Some(s)) => s,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("reconciler: failed to load snapshot: {e}");
                return;
            }
        };

        {
            let mut state = self.state.lock().await;
            for record in &snapshot.sessions {
                state.registry.restore_session(record.clone());
                if let Some(jar_snap) = snapshot.jar_for(record.id) {
                    state.jars.insert(record.id, CookieJar::restore(jar_snap.clone()));
                }
            }
            if let Some(cached_tier) = snapshot.device.tier_cache {
                state.tier.tier = cached_tier;
            }
        }

        let mut restored_tabs = Vec::new();
        for _ in 0..reconciler::MAX_TAB_QUERY_PROBES {
            match retry_host_read(|| self.host.query_tabs()).await {
                Ok(tabs) if !tabs.is_empty() => {
                    restored_tabs = tabs;
                    break;
                }
                Ok(_) => tokio::time::sleep(reconciler::TAB_QUERY_PROBE_DELAY).await,
                Err(e) => {
                    warn!("reconciler: query_tabs failed after retries: {e}");
                    tokio::time::sleep(reconciler::TAB_QUERY_PROBE_DELAY).await;
                }
            }
        }

        let tier_snapshot = { self.state.lock().await.tier.clone() };

        if !restored_tabs.is_empty()
            && reconciler::auto_rebind_allowed(tier_snapshot.tier, tier_snapshot.auto_restore_enabled)
        {
            let restored: Vec<reconciler::RestoredTab<TabId>> = restored_tabs
                .iter()
                .map(|(id, url)| reconciler::RestoredTab { tab_id: *id, url: url.clone() })
                .collect();
            let bindings = reconciler::match_restored_tabs(&restored, &snapshot.sessions);
            let mut state = self.state.lock().await;
            let now = Utc::now();
            for binding in bindings {
                state.registry.bind_tab(binding.tab_id, binding.session_id, now);
            }
        }
        // Free/Premium, or Enterprise without auto-restore: persisted
        // sessions survive but bindings stay cleared (spec §4.5 "Tier
        // gating") — restored tabs behave as fresh, unbound tabs.

        let engine = Arc::clone(self);
        let tier = tier_snapshot.tier;
        tokio::spawn(async move {
            tokio::time::sleep(reconciler::VALIDATE_CLEANUP_GRACE).await;
            engine.validate_and_cleanup(tier).await;
        });
    }

    /// Spec §4.5 step 5 `validate_and_cleanup`.
    async fn validate_and_cleanup(self: Arc<Self>, tier: Tier) {
        let now = Utc::now();
        let retention_days = crate::tier::TierCaps::for_tier(tier).dormant_retention_days;
        let to_retire: Vec<SessionId> = {
            let state = self.state.lock().await;
            state
                .registry
                .sessions()
                .filter(|s| s.status == SessionStatus::Dormant)
                .filter(|s| {
                    reconciler::classify_cleanup(retention_days, s.last_accessed_at, now)
                        == reconciler::CleanupOutcome::Retire
                })
                .map(|s| s.id)
                .collect()
        };
        if to_retire.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock().await;
            for id in &to_retire {
                state.registry.retire(*id);
                state.jars.remove(id);
            }
        }
        info!("reconciler: retired {} stale dormant session(s) past tier retention", to_retire.len());
        self.persist(true).await;
    }

    async fn inherit_session(self: &Arc<Self>, source: TabId, target: TabId) {
        let now = Utc::now();
        let (created, color) = {
            let mut state = self.state.lock().await;
            let Some(sid) = state.registry.session_for_tab(source) else {
                return;
            };
            let created = state.registry.bind_tab(target, sid, now);
            let color = state.registry.get(sid).map(|s| s.color_slot);
            (created, color)
        };
        // Idempotent by construction (spec §4.2, §9): the second of the two
        // dual-path inheritance events finds the tab already bound and
        // `bind_tab` is a no-op, so `created` is false and nothing re-fires.
        if !created {
            return;
        }
        if let Some(color) = color {
            if let Err(e) = self.host.set_tab_badge(target, color, "\u{25cf}").await {
                warn!("engine: failed to set inherited tab badge: {e}");
            }
        }
        self.persist(false).await;
    }

    async fn handle_tab_removed(self: &Arc<Self>, tab_id: TabId) {
        {
            let mut state = self.state.lock().await;
            let policy = if state.tier.tier == Tier::Enterprise && state.tier.auto_restore_enabled {
                RetirementPolicy::Ephemeral
            } else {
                RetirementPolicy::PreserveDormant
            };
            state.registry.unbind_tab(tab_id, policy);
        }
        // Spec §4.4 "Write discipline": tab-close is always immediate.
        self.persist(true).await;
    }

    /// Spec §4.3.4 script-origin capture. Per-tab probing (rather than
    /// trusting `record.domain`, which the host may report empty) finds
    /// which session currently occupies a tab whose shared-store view
    /// contains this cookie.
    async fn handle_cookie_changed(&self, record: RawCookieRecord, removed: bool) {
        if removed {
            return;
        }

        let tabs_by_session: Vec<(SessionId, Vec<String>)> = {
            let state = self.state.lock().await;
            state
                .registry
                .sessions()
                .map(|s| {
                    let hosts = s
                        .tabs
                        .iter()
                        .filter_map(|t| state.registry.tab_metadata(*t))
                        .filter_map(|m| m.last_seen_url.as_deref())
                        .filter_map(pipeline::request_context)
                        .map(|ctx| ctx.host)
                        .collect();
                    (s.id, hosts)
                })
                .collect()
        };

        let mut occupying = None;
        let mut matched_domain = None;
        'search: for (sid, hosts) in &tabs_by_session {
            for host in hosts {
                if let Ok(cookies) = retry_host_read(|| self.host.list_shared_cookies(host)).await {
                    if let Some(found) = cookies.iter().find(|c| c.name == record.name && c.path == record.path) {
                        occupying = Some(*sid);
                        matched_domain = Some(found.domain.clone());
                        break 'search;
                    }
                }
            }
        }
        let (Some(occupying), Some(matched_domain)) = (occupying, matched_domain) else {
            return;
        };

        // `record.domain` comes straight from the host event and may be
        // empty; `matched_domain` is the domain of the actual `Cookie`
        // object found in the shared store during the probe above, so
        // classification always uses a real, populated domain.
        let verdict = {
            let state = self.state.lock().await;
            pipeline::classify_cookie_change(&state.jars, occupying, &record, &matched_domain)
        };
        if verdict == ScrubVerdict::OwnedByOther {
            if let Err(e) = self.host.remove_shared_cookie(&record.host, &record.path, &record.name).await {
                warn!("engine: failed to scrub cookie-changed leak: {e}");
            }
        }
    }

    fn schedule_delayed_scrub(self: &Arc<Self>, host: String) {
        let engine = Arc::clone(self);
        let delay = self.config.scrub_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.scrub_host(&host).await;
        });
    }

    /// Spec §4.3.3 `scrub_shared_store`, restricted to one host. Runs the
    /// classification once per session currently occupying that host and
    /// deletes the union of everything classified `OwnedByOther` — a cookie
    /// a tab's own session doesn't recognize as its own is, by definition,
    /// something some other session's scrub pass will want gone too.
    pub async fn scrub_host(&self, host: &str) {
        let shared = match retry_host_read(|| self.host.list_shared_cookies(host)).await {
            Ok(c) => c,
            Err(e) => {
                warn!("engine: scrub list_shared_cookies({host}) failed after retries: {e}");
                return;
            }
        };
        if shared.is_empty() {
            return;
        }
        let shared_triples: Vec<(String, String, String)> =
            shared.iter().map(|c| (c.domain.clone(), c.path.clone(), c.name.clone())).collect();

        let to_delete: HashSet<(String, String, String)> = {
            let state = self.state.lock().await;
            let mut occupying = Vec::new();
            for (tab_id, sid) in state.registry.tab_bindings() {
                if let Some(meta) = state.registry.tab_metadata(*tab_id) {
                    if let Some(url) = &meta.last_seen_url {
                        if let Some(ctx) = pipeline::request_context(url) {
                            if ctx.host == host {
                                occupying.push(*sid);
                            }
                        }
                    }
                }
            }
            // Spec §4.3.3: scrubbing only applies to hosts "currently
            // occupied by at least one session tab".
            if occupying.is_empty() {
                return;
            }

            let mut to_delete = HashSet::new();
            for sid in occupying {
                let (_, deletions) = pipeline::scrub_host(&state.jars, sid, &shared_triples);
                to_delete.extend(deletions);
            }
            to_delete
        };

        for (_, path, name) in to_delete {
            if let Err(e) = self.host.remove_shared_cookie(host, &path, &name).await {
                warn!("engine: failed to remove leaked cookie '{name}' on {host}{path}: {e}");
            }
        }
    }

    async fn on_periodic_tick(self: &Arc<Self>) {
        let now = Utc::now();

        if let (Ok(tier), Ok(auto_restore)) =
            (self.tier_oracle.tier().await, self.tier_oracle.auto_restore_enabled().await)
        {
            let mut state = self.state.lock().await;
            state.tier.observe(tier, auto_restore, now);
        }
        let tier_changed = {
            let mut state = self.state.lock().await;
            let debounce = chrono::Duration::from_std(self.config.tier_change_debounce)
                .unwrap_or(crate::tier::TIER_CHANGE_DEBOUNCE);
            let changed = state.tier.apply_if_due(now, debounce);
            if changed {
                info!("engine: tier change committed after debounce: {:?}", state.tier.tier);
            }
            changed
        };
        if tier_changed {
            // Spec §4.4 "Write discipline": tier change is immediate, not the
            // periodic debounced safety-net write further down.
            self.persist(true).await;
        }

        let hosts: HashSet<String> = {
            let state = self.state.lock().await;
            state
                .registry
                .tab_bindings()
                .filter_map(|(tab_id, _)| state.registry.tab_metadata(*tab_id))
                .filter_map(|m| m.last_seen_url.as_deref())
                .filter_map(pipeline::request_context)
                .map(|ctx| ctx.host)
                .collect()
        };
        for host in hosts {
            self.scrub_host(&host).await;
        }

        {
            let mut state = self.state.lock().await;
            let now_ts = now.timestamp();
            for jar in state.jars.values_mut() {
                jar.sweep_expired(now_ts);
            }
        }

        // Spec §4.4 "Periodic write (60 s) as safety net."
        self.persist(false).await;
    }

    async fn build_snapshot(&self) -> Snapshot {
        let state = self.state.lock().await;
        let sessions = state
            .registry
            .sessions()
            .map(|s| {
                let tab_urls = s
                    .tabs
                    .iter()
                    .filter_map(|t| state.registry.tab_metadata(*t))
                    .filter_map(|m| m.last_seen_url.clone())
                    .collect();
                crate::persistence::SessionRecord {
                    id: s.id,
                    name: s.name.clone(),
                    color_slot: s.color_slot,
                    created_at: s.created_at,
                    last_accessed_at: s.last_accessed_at,
                    tab_urls,
                    status: s.status,
                }
            })
            .collect();
        let jars = state.jars.iter().map(|(id, jar)| (id.to_string(), jar.snapshot())).collect();
        Snapshot {
            sessions,
            jars,
            device: DeviceMetadata {
                fingerprint: Some(state.device_fingerprint.clone()),
                tier_cache: Some(state.tier.tier),
            },
        }
    }

    async fn persist(&self, immediate: bool) {
        let snapshot = self.build_snapshot().await;
        if immediate {
            if let Err(CoreError::PersistenceFull { .. }) = self.persistence.flush_immediately(&snapshot).await {
                self.prune_dormant_and_retry(snapshot).await;
            }
        } else if let Err(e) = Arc::clone(&self.persistence).enqueue_write(snapshot, false).await {
            warn!("engine: debounced persistence enqueue failed: {e}");
        }
    }

    /// Spec §7 `PersistenceFull` recovery: "prune dormant sessions
    /// oldest-first until fit, then retry once." Implemented as repeated
    /// single-session prune-and-retry rather than a one-shot retry, since
    /// there is no cheaper way to predict how much pruning a given quota
    /// needs without re-serializing.
    async fn prune_dormant_and_retry(&self, mut snapshot: Snapshot) {
        loop {
            let mut dormant: Vec<&crate::persistence::SessionRecord> = snapshot
                .sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Dormant)
                .collect();
            dormant.sort_by_key(|s| s.last_accessed_at);
            let Some(oldest) = dormant.first().map(|s| s.id) else {
                warn!("engine: persistence over quota with no dormant sessions left to prune");
                return;
            };
            snapshot.sessions.retain(|s| s.id != oldest);
            snapshot.jars.remove(&oldest.to_string());

            match self.persistence.flush_immediately(&snapshot).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    state.registry.retire(oldest);
                    state.jars.remove(&oldest);
                    warn!("engine: pruned dormant session {oldest} to fit persisted snapshot under quota");
                    return;
                }
                Err(CoreError::PersistenceFull { .. }) => continue,
                Err(e) => {
                    warn!("engine: persistence retry after pruning failed: {e}");
                    return;
                }
            }
        }
    }
}
