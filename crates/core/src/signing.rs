//! API key generation and webhook payload signing.
//!
//! API keys are random 64-character alphanumeric strings; only their SHA-256
//! digest is persisted. Webhook bodies are signed with HMAC-SHA256 under a
//! shared secret and carried in the `X-Tessera-Signature` header.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Length of a generated API key (alphanumeric characters).
pub const API_KEY_LENGTH: usize = 64;

/// Number of leading characters kept as a human-visible prefix.
pub const KEY_PREFIX_LENGTH: usize = 8;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Tessera-Signature";

/// Webhook delivery retry delays in seconds (exponential backoff).
pub const WEBHOOK_RETRY_DELAYS_SECS: [u64; 5] = [1, 2, 4, 8, 16];

// ---------------------------------------------------------------------------
// API key generation
// ---------------------------------------------------------------------------

/// The result of generating a new API key.
pub struct GeneratedApiKey {
    /// The plaintext key (shown to the user exactly once, never stored).
    pub plaintext: String,
    /// The first [`KEY_PREFIX_LENGTH`] characters of the key for display.
    pub prefix: String,
    /// The SHA-256 hex digest of the plaintext key (stored in the database).
    pub hash: String,
}

/// Generate a new random API key.
pub fn generate_api_key() -> GeneratedApiKey {
    let key: String = rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect();

    let prefix = key[..KEY_PREFIX_LENGTH].to_string();
    let hash = hash_api_key(&key);

    GeneratedApiKey {
        plaintext: key,
        prefix,
        hash,
    }
}

/// Compute the SHA-256 hex digest of an API key.
///
/// Used both during key creation (to store the hash) and during
/// authentication (to look up the key by hash).
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

// ---------------------------------------------------------------------------
// Webhook HMAC signing
// ---------------------------------------------------------------------------

type HmacSha256 = Hmac<Sha256>;

/// Compute the `X-Tessera-Signature` value for a webhook body:
/// `sha256=<hex HMAC-SHA256 of the body under the shared secret>`.
pub fn webhook_signature(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

// ---------------------------------------------------------------------------
// hex encoding helper (no extra dep)
// ---------------------------------------------------------------------------

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Key generation ----------------------------------------------------

    #[test]
    fn generated_key_is_64_alphanumeric_chars() {
        let key = generate_api_key();
        assert_eq!(key.plaintext.len(), API_KEY_LENGTH);
        assert!(key.plaintext.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_key_prefix_matches_start() {
        let key = generate_api_key();
        assert_eq!(&key.plaintext[..KEY_PREFIX_LENGTH], key.prefix);
    }

    #[test]
    fn generated_key_hash_is_sha256_hex() {
        let key = generate_api_key();
        assert_eq!(key.hash.len(), 64);
        assert!(key.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_matches_regeneration() {
        let key = generate_api_key();
        assert_eq!(key.hash, hash_api_key(&key.plaintext));
    }

    #[test]
    fn different_keys_produce_different_hashes() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.hash, b.hash);
    }

    // -- Webhook signatures ------------------------------------------------

    #[test]
    fn signature_has_sha256_prefix_and_hex_body() {
        let sig = webhook_signature("secret", r#"{"event":"job.completed"}"#);
        let hex_part = sig.strip_prefix("sha256=").expect("sha256= prefix");
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_is_deterministic() {
        assert_eq!(
            webhook_signature("secret", "body"),
            webhook_signature("secret", "body")
        );
    }

    #[test]
    fn signature_varies_with_secret_and_body() {
        let base = webhook_signature("secret", "body");
        assert_ne!(base, webhook_signature("other", "body"));
        assert_ne!(base, webhook_signature("secret", "other"));
    }

    // -- Retry schedule ----------------------------------------------------

    #[test]
    fn webhook_backoff_doubles_across_five_attempts() {
        assert_eq!(WEBHOOK_RETRY_DELAYS_SECS, [1, 2, 4, 8, 16]);
    }
}
