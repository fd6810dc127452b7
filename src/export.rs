//! Export/import wire format for Premium+/Enterprise (spec §6, §9.5 ADDED).
//!
//! Premium export is plain JSON, gzip'd via `flate2` once the payload crosses
//! 100 KB. Enterprise export additionally wraps the (possibly gzip'd) payload
//! in AES-256-GCM, keyed by PBKDF2-HMAC-SHA256 over a user passphrase — the
//! same `aes-gcm`/`pbkdf2`/`sha2` combination the pack uses for
//! `crates/csrf/src/aes_gcm_cipher.rs`, sourced from there since the teacher
//! itself never does encryption. Neither of these crates reaches for a JSON
//! envelope for the binary parts (salt, nonce, ciphertext) — this format
//! doesn't either, to avoid the size bloat of encoding bytes as a JSON number
//! array.

use std::collections::HashSet;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::cookie::Cookie;
use crate::error::CoreError;
use crate::tier::{Tier, TierCaps};

const MAGIC: &[u8; 4] = b"SIC1";
const FLAG_COMPRESSED: u8 = 0b01;
const FLAG_ENCRYPTED: u8 = 0b10;
const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Gzip kicks in once the plaintext payload crosses this size (spec §6
/// "Gzip above 100 KB").
const GZIP_THRESHOLD_BYTES: usize = 100 * 1024;

/// One exported session: its display name (if any) and the full contents of
/// its cookie jar. Tab bindings are not exported — importing a session
/// starts it DORMANT, same as a restored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedSession {
    pub name: Option<String>,
    pub cookies: Vec<Cookie>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExportBundle {
    pub sessions: Vec<ExportedSession>,
}

/// Encode `bundle` for `tier`, applying the transforms spec §6 describes for
/// that tier. Returns `ExportFailed` if the tier does not permit export at
/// all (Free), or if Enterprise export is requested without a passphrase.
pub fn encode(bundle: &ExportBundle, tier: Tier, passphrase: Option<&str>) -> Result<Vec<u8>, CoreError> {
    let caps = TierCaps::for_tier(tier);
    if !caps.export_allowed {
        return Err(CoreError::ExportFailed {
            message: format!("{tier:?} tier does not permit export"),
        });
    }

    let json = serde_json::to_vec(bundle).map_err(|e| CoreError::ExportFailed {
        message: format!("failed to serialize export bundle: {e}"),
    })?;

    let mut payload = json;
    let mut flags = 0u8;
    if payload.len() > GZIP_THRESHOLD_BYTES {
        payload = gzip_compress(&payload)?;
        flags |= FLAG_COMPRESSED;
    }

    if caps.export_encrypted {
        let passphrase = passphrase.ok_or_else(|| CoreError::ExportFailed {
            message: "enterprise export requires a passphrase".to_string(),
        })?;

        let salt: [u8; SALT_LEN] = rand::random();
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let key_bytes = derive_key(passphrase, &salt);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher.encrypt(nonce, payload.as_ref()).map_err(|e| CoreError::ExportFailed {
            message: format!("encryption failed: {e}"),
        })?;

        flags |= FLAG_ENCRYPTED;
        let mut out = Vec::with_capacity(MAGIC.len() + 1 + SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.push(flags);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        return Ok(out);
    }

    let mut out = Vec::with_capacity(MAGIC.len() + 1 + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(flags);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a blob produced by [`encode`]. `passphrase` is required iff the
/// blob carries the encrypted flag.
pub fn decode(bytes: &[u8], passphrase: Option<&str>) -> Result<ExportBundle, CoreError> {
    if bytes.len() < 5 || &bytes[0..4] != MAGIC {
        return Err(CoreError::ExportFailed {
            message: "not a session-isolation-core export blob".to_string(),
        });
    }
    let flags = bytes[4];
    let rest = &bytes[5..];

    let payload = if flags & FLAG_ENCRYPTED != 0 {
        if rest.len() < SALT_LEN + NONCE_LEN {
            return Err(CoreError::ExportFailed {
                message: "truncated encrypted export".to_string(),
            });
        }
        let passphrase = passphrase.ok_or_else(|| CoreError::ExportFailed {
            message: "passphrase required to decrypt this export".to_string(),
        })?;
        let salt = &rest[..SALT_LEN];
        let nonce_bytes = &rest[SALT_LEN..SALT_LEN + NONCE_LEN];
        let ciphertext = &rest[SALT_LEN + NONCE_LEN..];

        let key_bytes = derive_key(passphrase, salt);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher.decrypt(nonce, ciphertext).map_err(|_| CoreError::ExportFailed {
            message: "decryption failed (wrong passphrase or corrupt data)".to_string(),
        })?
    } else {
        rest.to_vec()
    };

    let json = if flags & FLAG_COMPRESSED != 0 {
        gzip_decompress(&payload)?
    } else {
        payload
    };

    serde_json::from_slice(&json).map_err(|e| CoreError::ExportFailed {
        message: format!("corrupt export payload: {e}"),
    })
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, CoreError> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| CoreError::ExportFailed {
        message: format!("gzip compression failed: {e}"),
    })?;
    encoder.finish().map_err(|e| CoreError::ExportFailed {
        message: format!("gzip compression failed: {e}"),
    })
}

fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, CoreError> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| CoreError::ExportFailed {
        message: format!("gzip decompression failed: {e}"),
    })?;
    Ok(out)
}

/// Resolve a collision-free display name for an imported session (spec §6
/// "Import performs duplicate-name auto-rename (append \" (imported)\",
/// \" (imported 2)\", …)"). `existing_lower` holds every live session's name,
/// already lower-cased (see `SessionRegistry::live_name_set`).
pub fn dedupe_import_name(existing_lower: &HashSet<String>, name: &str) -> String {
    if !existing_lower.contains(&name.to_ascii_lowercase()) {
        return name.to_string();
    }
    let mut attempt = format!("{name} (imported)");
    let mut n = 2;
    while existing_lower.contains(&attempt.to_ascii_lowercase()) {
        attempt = format!("{name} (imported {n})");
        n += 1;
    }
    attempt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::SameSite;

    fn bundle() -> ExportBundle {
        ExportBundle {
            sessions: vec![ExportedSession {
                name: Some("Work".to_string()),
                cookies: vec![Cookie {
                    name: "session".to_string(),
                    value: "abc".to_string(),
                    domain: "example.com".to_string(),
                    path: "/".to_string(),
                    secure: true,
                    http_only: true,
                    same_site: SameSite::Lax,
                    expires_at: None,
                    created_at: 0,
                }],
            }],
        }
    }

    #[test]
    fn free_tier_export_is_rejected() {
        let err = encode(&bundle(), Tier::Free, None).unwrap_err();
        assert!(matches!(err, CoreError::ExportFailed { .. }));
    }

    #[test]
    fn l3_premium_export_import_round_trips_plain() {
        let encoded = encode(&bundle(), Tier::Premium, None).unwrap();
        let decoded = decode(&encoded, None).unwrap();
        assert_eq!(decoded.sessions.len(), 1);
        assert_eq!(decoded.sessions[0].name.as_deref(), Some("Work"));
        assert_eq!(decoded.sessions[0].cookies[0].value, "abc");
    }

    #[test]
    fn enterprise_export_requires_passphrase() {
        let err = encode(&bundle(), Tier::Enterprise, None).unwrap_err();
        assert!(matches!(err, CoreError::ExportFailed { .. }));
    }

    #[test]
    fn l3_enterprise_export_import_round_trips_encrypted() {
        let encoded = encode(&bundle(), Tier::Enterprise, Some("correct horse")).unwrap();
        let decoded = decode(&encoded, Some("correct horse")).unwrap();
        assert_eq!(decoded.sessions[0].name.as_deref(), Some("Work"));
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let encoded = encode(&bundle(), Tier::Enterprise, Some("correct horse")).unwrap();
        let err = decode(&encoded, Some("wrong passphrase")).unwrap_err();
        assert!(matches!(err, CoreError::ExportFailed { .. }));
    }

    #[test]
    fn large_payload_is_gzip_compressed() {
        let mut big = bundle();
        big.sessions[0].cookies = (0..20_000)
            .map(|i| Cookie {
                name: format!("c{i}"),
                value: "x".repeat(10),
                domain: "example.com".to_string(),
                path: "/".to_string(),
                secure: false,
                http_only: false,
                same_site: SameSite::Lax,
                expires_at: None,
                created_at: 0,
            })
            .collect();
        let json_len = serde_json::to_vec(&big).unwrap().len();
        assert!(json_len > GZIP_THRESHOLD_BYTES);

        let encoded = encode(&big, Tier::Premium, None).unwrap();
        assert!(encoded.len() < json_len, "gzip output should be smaller than raw json");
        let decoded = decode(&encoded, None).unwrap();
        assert_eq!(decoded.sessions[0].cookies.len(), 20_000);
    }

    #[test]
    fn dedupe_import_name_appends_suffix_on_collision() {
        let mut existing = HashSet::new();
        existing.insert("work".to_string());
        assert_eq!(dedupe_import_name(&existing, "Work"), "Work (imported)");

        existing.insert("work (imported)".to_string());
        assert_eq!(dedupe_import_name(&existing, "Work"), "Work (imported 2)");
    }

    #[test]
    fn dedupe_import_name_passes_through_when_unique() {
        let existing = HashSet::new();
        assert_eq!(dedupe_import_name(&existing, "Personal"), "Personal");
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let err = decode(b"not an export", None).unwrap_err();
        assert!(matches!(err, CoreError::ExportFailed { .. }));
    }
}
