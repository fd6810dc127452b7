//! In-memory stand-in for the browser extension runtime, shared across the
//! scenario integration tests (spec §9.6 ADDED).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use session_isolation_core::config::SessionCoreConfig;
use session_isolation_core::cookie::Cookie;
use session_isolation_core::engine::SessionCore;
use session_isolation_core::host::{HostApi, TabId};
use session_isolation_core::persistence::PersistenceStore;
use session_isolation_core::tier::{Tier, TierOracle};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct FakeHost {
    next_tab_id: Mutex<u64>,
    pub tabs: Mutex<HashMap<TabId, String>>,
    pub shared_cookies: Mutex<HashMap<String, Vec<Cookie>>>,
    pub kv: Mutex<HashMap<String, Vec<u8>>>,
    pub removed: Mutex<Vec<(String, String, String)>>,
    pub badges: Mutex<Vec<(TabId, u8)>>,
    queued_tabs: Mutex<Option<Vec<(TabId, String)>>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed_shared_cookie(&self, host: &str, cookie: Cookie) {
        self.shared_cookies.lock().await.entry(host.to_string()).or_default().push(cookie);
    }

    /// Scripts the next `query_tabs` call (used by restart-reconciliation
    /// tests to simulate the host reporting tabs the OS restored).
    pub async fn queue_restored_tabs(&self, tabs: Vec<(TabId, String)>) {
        *self.queued_tabs.lock().await = Some(tabs);
    }

    pub async fn removed_cookies(&self) -> Vec<(String, String, String)> {
        self.removed.lock().await.clone()
    }
}

#[async_trait]
impl HostApi for FakeHost {
    async fn open_tab(&self, url: &str) -> anyhow::Result<TabId> {
        let mut next = self.next_tab_id.lock().await;
        *next += 1;
        let id = TabId(*next);
        self.tabs.lock().await.insert(id, url.to_string());
        Ok(id)
    }

    async fn query_tabs(&self) -> anyhow::Result<Vec<(TabId, String)>> {
        if let Some(tabs) = self.queued_tabs.lock().await.take() {
            return Ok(tabs);
        }
        Ok(self.tabs.lock().await.iter().map(|(id, url)| (*id, url.clone())).collect())
    }

    async fn list_shared_cookies(&self, host: &str) -> anyhow::Result<Vec<Cookie>> {
        Ok(self.shared_cookies.lock().await.get(host).cloned().unwrap_or_default())
    }

    async fn remove_shared_cookie(&self, host: &str, path: &str, name: &str) -> anyhow::Result<()> {
        if let Some(cookies) = self.shared_cookies.lock().await.get_mut(host) {
            cookies.retain(|c| !(c.path == path && c.name == name));
        }
        self.removed.lock().await.push((host.to_string(), path.to_string(), name.to_string()));
        Ok(())
    }

    async fn set_tab_badge(&self, tab_id: TabId, color_slot: u8, _glyph: &str) -> anyhow::Result<()> {
        self.badges.lock().await.push((tab_id, color_slot));
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.kv.lock().await.get(key).cloned())
    }

    async fn kv_put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.kv.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn notify(&self, _title: &str, _body: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A tier oracle whose answer can be changed mid-test (spec S6 tier
/// downgrade scenario).
pub struct ScriptedTierOracle {
    pub tier: Mutex<Tier>,
    pub auto_restore: Mutex<bool>,
}

impl ScriptedTierOracle {
    pub fn new(tier: Tier, auto_restore: bool) -> Arc<Self> {
        Arc::new(Self {
            tier: Mutex::new(tier),
            auto_restore: Mutex::new(auto_restore),
        })
    }

    pub async fn set(&self, tier: Tier, auto_restore: bool) {
        *self.tier.lock().await = tier;
        *self.auto_restore.lock().await = auto_restore;
    }
}

#[async_trait]
impl TierOracle for ScriptedTierOracle {
    async fn tier(&self) -> anyhow::Result<Tier> {
        Ok(*self.tier.lock().await)
    }
    async fn auto_restore_enabled(&self) -> anyhow::Result<bool> {
        Ok(*self.auto_restore.lock().await)
    }
}

/// Fast-ticking config so debounce/scrub-delay tests don't need real wall
/// time.
pub fn test_config() -> SessionCoreConfig {
    SessionCoreConfig {
        snapshot_path: std::env::temp_dir().join("session-core-test-snapshot.json"),
        periodic_tick: Duration::from_secs(60),
        cookie_write_debounce: Duration::from_millis(10),
        tier_change_debounce: Duration::from_millis(10),
        scrub_delay: Duration::from_millis(20),
        persistence_quota_bytes: None,
    }
}

/// Build a `SessionCore` wired to a fresh `FakeHost`, for scenario tests that
/// only need the event-driven API.
pub fn build_core(tier: Tier, auto_restore: bool) -> (Arc<SessionCore>, Arc<FakeHost>) {
    let (core, host, _oracle) = build_core_with_oracle(tier, auto_restore);
    (core, host)
}

/// Same as [`build_core`], but also hands back the `ScriptedTierOracle` so a
/// test can change the oracle's answer mid-scenario (spec S6 tier-downgrade).
pub fn build_core_with_oracle(
    tier: Tier,
    auto_restore: bool,
) -> (Arc<SessionCore>, Arc<FakeHost>, Arc<ScriptedTierOracle>) {
    let host = FakeHost::new();
    let host_api: Arc<dyn HostApi> = host.clone();
    let config = test_config();
    let persistence = Arc::new(PersistenceStore::new(
        host_api.clone(),
        "test-snapshot",
        config.cookie_write_debounce,
        config.persistence_quota_bytes,
    ));
    let oracle = ScriptedTierOracle::new(tier, auto_restore);
    let tier_oracle: Arc<dyn TierOracle> = oracle.clone();
    let core = SessionCore::new(host_api, persistence, tier_oracle, config, tier, auto_restore);
    (core, host, oracle)
}
