//! Ambient configuration (spec §9.2, ADDED).
//!
//! Loaded the way the teacher loads `cortex-scout.json`
//! (`core/config.rs::load_shadow_config`): try an explicit file, then fall
//! back to defaults, with per-field env-var overrides. Missing file or parse
//! error never aborts startup — it logs and falls back to defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub const ENV_CONFIG_PATH: &str = "SESSION_CORE_CONFIG";
pub const ENV_SNAPSHOT_PATH: &str = "SESSION_CORE_SNAPSHOT_PATH";
pub const ENV_PERIODIC_TICK_SECS: &str = "SESSION_CORE_TICK_SECS";

/// Raw, all-optional JSON shape for `session-core.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub snapshot_path: Option<String>,
    pub periodic_tick_secs: Option<u64>,
    pub cookie_write_debounce_ms: Option<u64>,
    pub tier_change_debounce_secs: Option<u64>,
    pub scrub_delay_secs: Option<u64>,
    pub persistence_quota_bytes: Option<usize>,
}

/// Resolved configuration the engine is constructed with.
#[derive(Debug, Clone)]
pub struct SessionCoreConfig {
    pub snapshot_path: PathBuf,
    /// Spec §4.3.3/§9 Open Questions: reconciled at 60 s (the host's
    /// 1-minute minimum for periodic timers).
    pub periodic_tick: Duration,
    /// Spec §4.4 cookie-upsert debounce.
    pub cookie_write_debounce: Duration,
    /// Spec §4.6 oracle-flapping debounce.
    pub tier_change_debounce: Duration,
    /// Spec §4.3.3 delayed shared-store scrub.
    pub scrub_delay: Duration,
    pub persistence_quota_bytes: Option<usize>,
}

impl Default for SessionCoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            periodic_tick: Duration::from_secs(60),
            cookie_write_debounce: Duration::from_secs(1),
            tier_change_debounce: Duration::from_secs(5),
            scrub_delay: Duration::from_secs(3),
            persistence_quota_bytes: None,
        }
    }
}

/// `./session-core.json` → `$SESSION_CORE_CONFIG` → defaults, mirroring the
/// teacher's `load_shadow_config` search order. Per-field env-var overrides
/// apply on top of whichever file (or lack of one) was found.
pub fn load() -> SessionCoreConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![PathBuf::from("session-core.json")];
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            v.insert(0, PathBuf::from(p));
        }
        v
    };

    let raw = candidates
        .iter()
        .find_map(|path| match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("session-core.json loaded from {}", path.display());
                    Some(cfg)
                }
                Err(e) => {
                    tracing::warn!(
                        "session-core.json parse error at {}: {e} — using defaults",
                        path.display()
                    );
                    None
                }
            },
            Err(_) => None,
        })
        .unwrap_or_default();

    resolve(raw)
}

fn resolve(raw: RawConfig) -> SessionCoreConfig {
    let defaults = SessionCoreConfig::default();

    let snapshot_path = raw
        .snapshot_path
        .map(PathBuf::from)
        .or_else(|| std::env::var(ENV_SNAPSHOT_PATH).ok().map(PathBuf::from))
        .unwrap_or(defaults.snapshot_path);

    let periodic_tick = raw
        .periodic_tick_secs
        .or_else(|| {
            std::env::var(ENV_PERIODIC_TICK_SECS)
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .map(Duration::from_secs)
        .unwrap_or(defaults.periodic_tick);

    SessionCoreConfig {
        snapshot_path,
        periodic_tick,
        cookie_write_debounce: raw
            .cookie_write_debounce_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.cookie_write_debounce),
        tier_change_debounce: raw
            .tier_change_debounce_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.tier_change_debounce),
        scrub_delay: raw
            .scrub_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.scrub_delay),
        persistence_quota_bytes: raw.persistence_quota_bytes.or(defaults.persistence_quota_bytes),
    }
}

/// Platform data-dir default → current-directory fallback (spec §9.2 / §4.4
/// "resolved the way the teacher resolves cortex-scout.json").
fn default_snapshot_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("session-isolation-core").join("snapshot.json"))
        .unwrap_or_else(|| PathBuf::from("session-core-snapshot.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_defaults_when_raw_is_empty() {
        let cfg = resolve(RawConfig::default());
        assert_eq!(cfg.periodic_tick, Duration::from_secs(60));
        assert_eq!(cfg.tier_change_debounce, Duration::from_secs(5));
        assert_eq!(cfg.scrub_delay, Duration::from_secs(3));
    }

    #[test]
    fn resolve_prefers_file_values_over_defaults() {
        let raw = RawConfig {
            periodic_tick_secs: Some(90),
            cookie_write_debounce_ms: Some(2000),
            ..Default::default()
        };
        let cfg = resolve(raw);
        assert_eq!(cfg.periodic_tick, Duration::from_secs(90));
        assert_eq!(cfg.cookie_write_debounce, Duration::from_secs(2));
    }
}
