//! Error kinds for the session isolation core.
//!
//! Mirrors the shape the teacher uses for component-scoped error enums
//! (`features/non_robot_search.rs::NonRobotSearchError`): one `thiserror`
//! enum per externally-visible failure mode, each carrying the context a
//! caller needs to act on it. Parsing and cleanup failures never reach this
//! type — they are logged and swallowed at the point of failure (spec §7
//! propagation policy).

use thiserror::Error;

use crate::tier::Tier;

/// Failures the registry/persistence/tier layers can surface to callers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("tier {tier:?} allows at most {limit} live sessions (currently {current})")]
    OverSessionLimit {
        tier: Tier,
        limit: usize,
        current: usize,
    },

    #[error("invalid session name: {reason}")]
    InvalidName { reason: InvalidNameReason },

    #[error("host API call failed after exhausting retries: {message}")]
    HostUnavailable { message: String },

    #[error("persisted snapshot exceeds host storage quota ({size} bytes > {quota} bytes)")]
    PersistenceFull { size: usize, quota: usize },

    #[error("unrecoverable state corruption during startup: {message}")]
    Fatal { message: String },

    /// Export/import is an **(ADDED)** feature beyond spec §7's error kinds
    /// (spec §6 wire format, §9.5); it reuses the same drop-and-surface shape
    /// rather than inventing a separate propagation path.
    #[error("export/import failed: {message}")]
    ExportFailed { message: String },
}

/// Why a proposed session display name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidNameReason {
    TooShort,
    TooLong,
    DisallowedCharacter,
    DuplicateCaseInsensitive,
    NamingNotAllowedForTier,
}

impl std::fmt::Display for InvalidNameReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvalidNameReason::TooShort => "name must be at least 1 grapheme cluster",
            InvalidNameReason::TooLong => "name must be at most 50 grapheme clusters",
            InvalidNameReason::DisallowedCharacter => {
                "name may not contain angle brackets, quotes, or a backtick"
            }
            InvalidNameReason::DuplicateCaseInsensitive => {
                "a live session already has this name (case-insensitive)"
            }
            InvalidNameReason::NamingNotAllowedForTier => {
                "current tier does not permit naming sessions"
            }
        };
        f.write_str(s)
    }
}
