//! Deterministic color-slot assignment (spec §4.2, §3 invariant).
//!
//! `slot = stable_hash(session_id) mod 12`. Must be reproducible across
//! restarts and process versions, so this intentionally avoids
//! `std::collections::hash_map::DefaultHasher` (its seed is randomized per
//! process) in favor of a small hand-rolled FNV-1a — a pure function with no
//! external dependency, in keeping with the teacher's preference for
//! zero-dependency utility helpers where stdlib/a one-function algorithm
//! suffices (e.g. `features/proxy_manager.rs::detect_proxy_scheme_by_port`).

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Stable hash of a session identifier, mod `slot_count`.
pub fn color_slot(session_id: &str, slot_count: usize) -> u8 {
    debug_assert!(slot_count > 0);
    (fnv1a(session_id.as_bytes()) % slot_count as u64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_pure_and_deterministic() {
        let a = color_slot("session-123", 12);
        let b = color_slot("session-123", 12);
        assert_eq!(a, b);
    }

    #[test]
    fn stays_within_slot_count() {
        for id in ["a", "b", "session-xyz", ""] {
            assert!(color_slot(id, 12) < 12);
        }
    }

    #[test]
    fn differs_across_ids_in_the_common_case() {
        let a = color_slot("session-1", 12);
        let b = color_slot("session-2", 12);
        // Not a hard guarantee (pigeonhole), but true for this pair.
        assert_ne!(a, b);
    }
}
