//! Durable snapshot of registry, jars, and tab metadata (spec §4.4).
//!
//! Writes go through `host::HostApi::kv_put` — the core never assumes a
//! particular storage backend, only a key-value contract (spec §6). The
//! debounce/coalescing shape mirrors the teacher's cookie-write cadence
//! reasoning (`features/auth_registry.rs` atomic-write discipline) scaled up
//! with a quiet-period timer, and the "fires at most once per period even
//! under continuous triggering" backpressure rule from spec §5.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::cookie::jar::CookieJarSnapshot;
use crate::error::CoreError;
use crate::host::HostApi;
use crate::registry::{SessionId, SessionStatus};
use crate::tier::Tier;

/// One session's persisted fields (spec §6 "Persisted snapshot").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub name: Option<String>,
    pub color_slot: u8,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub tab_urls: Vec<String>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceMetadata {
    pub fingerprint: Option<String>,
    pub tier_cache: Option<Tier>,
}

/// The full persisted record (spec §4.4 "Snapshot schema", §6 "Persisted
/// snapshot (stable across versions)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub sessions: Vec<SessionRecord>,
    /// Keyed by `SessionId` (as its string form, since JSON object keys must
    /// be strings).
    pub jars: HashMap<String, CookieJarSnapshot>,
    pub device: DeviceMetadata,
}

impl Snapshot {
    pub fn jar_for(&self, id: SessionId) -> Option<&CookieJarSnapshot> {
        self.jars.get(&id.to_string())
    }
}

struct Inner {
    latest: Option<Snapshot>,
    flush_in_flight: bool,
}

/// Debounced, single-writer snapshot store.
pub struct PersistenceStore {
    host: Arc<dyn HostApi>,
    key: String,
    quiet_period: StdDuration,
    quota_bytes: Option<usize>,
    inner: Mutex<Inner>,
}

impl PersistenceStore {
    pub fn new(
        host: Arc<dyn HostApi>,
        key: impl Into<String>,
        quiet_period: StdDuration,
        quota_bytes: Option<usize>,
    ) -> Self {
        Self {
            host,
            key: key.into(),
            quiet_period,
            quota_bytes,
            inner: Mutex::new(Inner {
                latest: None,
                flush_in_flight: false,
            }),
        }
    }

    pub async fn load(&self) -> Result<Option<Snapshot>, CoreError> {
        let bytes = self
            .host
            .kv_get(&self.key)
            .await
            .map_err(|e| CoreError::HostUnavailable {
                message: e.to_string(),
            })?;
        match bytes {
            None => Ok(None),
            Some(b) => serde_json::from_slice(&b).map(Some).map_err(|e| CoreError::Fatal {
                message: format!("corrupt snapshot at key '{}': {e}", self.key),
            }),
        }
    }

    /// Flush synchronously (`immediate`) or coalesce into the 1-second
    /// quiet-period debounce (spec §4.4 "Write discipline"). Session
    /// create/delete and tab-close use `immediate = true`; cookie upserts
    /// and the periodic safety-net write use `immediate = false`.
    pub async fn enqueue_write(self: &Arc<Self>, snapshot: Snapshot, immediate: bool) -> Result<(), CoreError> {
        if immediate {
            return self.flush_now(&snapshot).await;
        }

        let mut inner = self.inner.lock().await;
        inner.latest = Some(snapshot);
        if inner.flush_in_flight {
            // An earlier enqueue already scheduled a flush; this update
            // rides along with it (coalescing).
            return Ok(());
        }
        inner.flush_in_flight = true;
        drop(inner);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.quiet_period).await;
            let snapshot = {
                let mut inner = this.inner.lock().await;
                inner.flush_in_flight = false;
                inner.latest.take()
            };
            if let Some(snapshot) = snapshot {
                if let Err(e) = this.flush_now(&snapshot).await {
                    warn!("persistence: debounced flush failed: {e}");
                }
            }
        });
        Ok(())
    }

    async fn flush_now(&self, snapshot: &Snapshot) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(snapshot).map_err(|e| CoreError::Fatal {
            message: format!("snapshot serialization failed: {e}"),
        })?;
        if let Some(quota) = self.quota_bytes {
            if bytes.len() > quota {
                return Err(CoreError::PersistenceFull {
                    size: bytes.len(),
                    quota,
                });
            }
        }
        self.host
            .kv_put(&self.key, bytes)
            .await
            .map_err(|e| CoreError::HostUnavailable {
                message: e.to_string(),
            })
    }

    /// Bypass debouncing/quota and write directly — used by the caller's
    /// prune-and-retry-once recovery from `PersistenceFull` (spec §7).
    pub async fn flush_immediately(&self, snapshot: &Snapshot) -> Result<(), CoreError> {
        self.flush_now(snapshot).await
    }
}
