pub mod config;
pub mod cookie;
pub mod engine;
pub mod error;
pub mod export;
pub mod host;
pub mod persistence;
pub mod pipeline;
pub mod reconciler;
pub mod registry;
pub mod tier;

// --- Primary exports ---
pub use cookie::{Cookie, CookieJar, SameSite};
pub use engine::SessionCore;
pub use error::CoreError;
pub use host::{HostApi, HostEvent, RawCookieRecord, TabId};
pub use registry::{Session, SessionId, SessionRegistry, SessionStatus};
pub use tier::{Tier, TierCaps, TierOracle};
