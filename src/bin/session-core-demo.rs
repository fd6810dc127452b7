//! Small CLI smoke tool: wires a `SessionCore` to an in-memory demo host,
//! replays a scripted sequence of events, and prints the resulting registry
//! snapshot — the same spirit as the teacher's `shadow-sandbox.rs` /
//! `search-compare.rs` dev tools.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use session_isolation_core::cookie::Cookie;
use session_isolation_core::engine::SessionCore;
use session_isolation_core::host::{HostApi, HostEvent, RawCookieRecord, TabId};
use session_isolation_core::tier::{Tier, TierOracle};
use tokio::sync::Mutex;
use tracing::info;

/// An in-process stand-in for the browser extension runtime: an open-tab
/// table, a shared cookie jar keyed by host, and a key-value blob store.
struct DemoHost {
    next_tab_id: Mutex<u64>,
    tabs: Mutex<HashMap<TabId, String>>,
    shared_cookies: Mutex<HashMap<String, Vec<Cookie>>>,
    kv: Mutex<HashMap<String, Vec<u8>>>,
}

impl DemoHost {
    fn new() -> Self {
        Self {
            next_tab_id: Mutex::new(1),
            tabs: Mutex::new(HashMap::new()),
            shared_cookies: Mutex::new(HashMap::new()),
            kv: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl HostApi for DemoHost {
    async fn open_tab(&self, url: &str) -> anyhow::Result<TabId> {
        let mut next = self.next_tab_id.lock().await;
        let id = TabId(*next);
        *next += 1;
        self.tabs.lock().await.insert(id, url.to_string());
        info!("demo-host: opened tab {:?} at {url}", id);
        Ok(id)
    }

    async fn query_tabs(&self) -> anyhow::Result<Vec<(TabId, String)>> {
        Ok(self.tabs.lock().await.iter().map(|(id, url)| (*id, url.clone())).collect())
    }

    async fn list_shared_cookies(&self, host: &str) -> anyhow::Result<Vec<Cookie>> {
        Ok(self.shared_cookies.lock().await.get(host).cloned().unwrap_or_default())
    }

    async fn remove_shared_cookie(&self, host: &str, path: &str, name: &str) -> anyhow::Result<()> {
        if let Some(cookies) = self.shared_cookies.lock().await.get_mut(host) {
            cookies.retain(|c| !(c.path == path && c.name == name));
        }
        info!("demo-host: scrubbed shared cookie '{name}' on {host}{path}");
        Ok(())
    }

    async fn set_tab_badge(&self, tab_id: TabId, color_slot: u8, glyph: &str) -> anyhow::Result<()> {
        info!("demo-host: tab {tab_id:?} badge -> slot {color_slot} {glyph}");
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.kv.lock().await.get(key).cloned())
    }

    async fn kv_put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.kv.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn notify(&self, title: &str, body: &str) -> anyhow::Result<()> {
        info!("demo-host: notify '{title}': {body}");
        Ok(())
    }
}

/// Fixed Enterprise tier with auto-restore on, for a scripted demo run.
struct FixedTierOracle;

#[async_trait]
impl TierOracle for FixedTierOracle {
    async fn tier(&self) -> anyhow::Result<Tier> {
        Ok(Tier::Enterprise)
    }
    async fn auto_restore_enabled(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let host: Arc<dyn HostApi> = Arc::new(DemoHost::new());
    let config = session_isolation_core::config::load();
    let persistence = Arc::new(session_isolation_core::persistence::PersistenceStore::new(
        Arc::clone(&host),
        "session-core-demo-snapshot",
        config.cookie_write_debounce,
        config.persistence_quota_bytes,
    ));
    let tier_oracle: Arc<dyn TierOracle> = Arc::new(FixedTierOracle);

    let core = SessionCore::new(host, persistence, tier_oracle, config, Tier::Enterprise, true);

    let work_sid = core.create_session(Some("https://mail.example.com/")).await?;
    info!("created session {work_sid}");

    core.handle_event(HostEvent::HeadersReceived {
        tab_id: TabId(1),
        url: "https://mail.example.com/".to_string(),
        headers: vec![("Set-Cookie".to_string(), "session=abc123; Path=/; Secure".to_string())],
    })
    .await;

    core.set_name(work_sid, "Work".to_string()).await?;

    core.handle_event(HostEvent::CookieChanged {
        cookie: RawCookieRecord {
            name: "tracker".to_string(),
            value: "xyz".to_string(),
            domain: "mail.example.com".to_string(),
            path: "/".to_string(),
            host: "mail.example.com".to_string(),
        },
        removed: false,
    })
    .await;

    core.handle_event(HostEvent::PeriodicTick).await;

    let exported = core.export_sessions(&[work_sid], Some("demo passphrase")).await?;
    info!("exported {} bytes for session {work_sid}", exported.len());

    core.handle_event(HostEvent::TabRemoved { tab_id: TabId(1) }).await;

    info!("demo run complete");
    Ok(())
}
