//! The abstract boundary to the hosting browser extension runtime.
//!
//! Everything the core cannot observe or control directly — tab lifecycle,
//! the shared cookie store, a key-value persistence backend — is expressed
//! here as an `async_trait`, the same seam the teacher uses for
//! `tools/search/mod.rs::SearchService` (an `Arc<dyn SearchService>` held by
//! `AppState`). Production code wires a real implementation backed by the
//! extension APIs listed in spec §6; tests wire an in-memory fake
//! (`tests/common/mod.rs`).

use async_trait::async_trait;

use crate::cookie::Cookie;

/// Opaque, process-lifetime-scoped tab identifier handed out by the host.
///
/// Never persisted (spec §9 "Tab-ID instability") — only URLs are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u64);

/// One of the five event streams the host delivers to the core (spec §2, §6).
#[derive(Debug, Clone)]
pub enum HostEvent {
    BeforeSendHeaders {
        tab_id: TabId,
        url: String,
        headers: Vec<(String, String)>,
    },
    HeadersReceived {
        tab_id: TabId,
        url: String,
        headers: Vec<(String, String)>,
    },
    CookieChanged {
        cookie: RawCookieRecord,
        removed: bool,
    },
    TabCreated {
        tab_id: TabId,
        opener_tab_id: Option<TabId>,
    },
    TabNavigatedFrom {
        source_tab_id: TabId,
        target_tab_id: TabId,
    },
    TabRemoved {
        tab_id: TabId,
    },
    TabActivated {
        tab_id: TabId,
    },
    TabUpdated {
        tab_id: TabId,
        new_url: String,
    },
    PeriodicTick,
}

/// A cookie as reported by the host's shared-store change event. The host may
/// report an empty `domain` (spec §4.3.4), so callers must not rely on it for
/// ownership classification.
#[derive(Debug, Clone)]
pub struct RawCookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub host: String,
}

/// Outbound actions the core may request of the host (spec §6).
#[async_trait]
pub trait HostApi: Send + Sync {
    async fn open_tab(&self, url: &str) -> anyhow::Result<TabId>;

    async fn query_tabs(&self) -> anyhow::Result<Vec<(TabId, String)>>;

    /// All cookies the shared store currently holds for `host`, in the
    /// ambient store the core can observe but not exclusively own.
    async fn list_shared_cookies(&self, host: &str) -> anyhow::Result<Vec<Cookie>>;

    async fn remove_shared_cookie(&self, host: &str, path: &str, name: &str) -> anyhow::Result<()>;

    async fn set_tab_badge(&self, tab_id: TabId, color_slot: u8, glyph: &str) -> anyhow::Result<()>;

    async fn kv_get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn kv_put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;

    /// Best-effort; failures are logged and swallowed by callers (teacher
    /// pattern: `browser_manager.rs` non-fatal `browser.close()` cleanup).
    async fn notify(&self, title: &str, body: &str) -> anyhow::Result<()>;
}
