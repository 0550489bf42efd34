//! Content hashing and Ed25519 signing of pack digests.
//!
//! Hashes are lowercase hex BLAKE3. A pack's `content_hash` is the hash of
//! all per-file hashes sorted by value and concatenated, so it does not
//! depend on the order in which files were visited.
//!
//! Only the content hash is signed, never the full manifest. The signature
//! covers the 32 raw digest bytes.
//!
//! # Key resolution
//!
//! | Order | Source | [`KeySource`] |
//! |-------|--------|---------------|
//! | 1 | key passed with the build request | `Provided` |
//! | 2 | `PACK_SIGNING_KEY`, then `signing.private_key` | `FromConfiguration` |
//! | 3 | freshly generated key | `EphemeralGenerated` |
//!
//! A malformed key at step 1 or 2 is an error; it never falls through.
//!
//! # Interop
//!
//! Signatures are over the raw digest bytes, not the UTF-8 bytes of the
//! hex string. Tools that sign the hex text produce signatures that
//! [`verify_digest`] rejects, and packs signed here will not verify in
//! those tools.

use anyhow::{anyhow, bail, Context, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::Serialize;

use crate::config::SigningConfig;
use crate::error::{PackError, PackResult};
use crate::models::FileRecord;

/// Lowercase hex BLAKE3 digest of `data`.
pub fn hash_content(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Whole-pack digest: hash of the per-file hashes sorted by value.
pub fn content_hash(records: &[FileRecord]) -> String {
    let mut hashes: Vec<&str> = records.iter().map(|r| r.hash.as_str()).collect();
    hashes.sort_unstable();
    hash_content(hashes.concat().as_bytes())
}

/// Where the signing key for a pack came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Provided,
    FromConfiguration,
    EphemeralGenerated,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Provided => "provided",
            KeySource::FromConfiguration => "from_configuration",
            KeySource::EphemeralGenerated => "ephemeral_generated",
        }
    }
}

/// Result of signing a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDigest {
    pub signature: String,
    pub public_key: String,
    pub key_source: KeySource,
}

/// Parse a hex-encoded 32-byte Ed25519 seed.
pub fn parse_seed(seed_hex: &str) -> Result<SigningKey> {
    let bytes = hex::decode(seed_hex.trim()).context("signing key is not valid hex")?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("signing key must be 32 bytes, got {}", bytes.len()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Generate a fresh key pair, returned as `(seed_hex, public_key_hex)`.
pub fn generate_keypair() -> (String, String) {
    let key = SigningKey::generate(&mut OsRng);
    (
        hex::encode(key.to_bytes()),
        hex::encode(key.verifying_key().to_bytes()),
    )
}

/// Signs pack digests with a key resolved from the ordered chain above.
#[derive(Debug, Clone, Default)]
pub struct ManifestSigner {
    configured_seed: Option<String>,
}

impl ManifestSigner {
    pub fn new(configured_seed: Option<String>) -> Self {
        Self { configured_seed }
    }

    pub fn from_config(config: &SigningConfig) -> Self {
        Self::new(config.configured_seed())
    }

    /// Resolve the signing key. Never falls back past a malformed key.
    pub fn resolve_key(&self, explicit: Option<&str>) -> PackResult<(SigningKey, KeySource)> {
        if let Some(seed) = explicit {
            let key = parse_seed(seed)
                .map_err(|e| PackError::InvalidInput(format!("provided signing key: {:#}", e)))?;
            return Ok((key, KeySource::Provided));
        }

        if let Some(ref seed) = self.configured_seed {
            let key = parse_seed(seed).map_err(|e| {
                PackError::InvalidInput(format!("configured signing key: {:#}", e))
            })?;
            return Ok((key, KeySource::FromConfiguration));
        }

        tracing::warn!("no signing key configured; generating an ephemeral key");
        Ok((SigningKey::generate(&mut OsRng), KeySource::EphemeralGenerated))
    }

    /// Sign the raw bytes of a hex digest.
    pub fn sign(&self, digest_hex: &str, explicit: Option<&str>) -> PackResult<SignedDigest> {
        let (key, key_source) = self.resolve_key(explicit)?;
        sign_with(&key, key_source, digest_hex)
    }
}

/// Sign the raw bytes of a hex digest with an already resolved key.
pub fn sign_with(key: &SigningKey, key_source: KeySource, digest_hex: &str) -> PackResult<SignedDigest> {
    let digest = hex::decode(digest_hex)
        .map_err(|e| PackError::Internal(anyhow!("digest is not valid hex: {}", e)))?;
    let signature = key.sign(&digest);

    Ok(SignedDigest {
        signature: hex::encode(signature.to_bytes()),
        public_key: hex::encode(key.verifying_key().to_bytes()),
        key_source,
    })
}

/// Verify a hex signature over the raw bytes of a hex digest.
pub fn verify_digest(digest_hex: &str, signature_hex: &str, public_key_hex: &str) -> Result<()> {
    let digest = hex::decode(digest_hex).context("digest is not valid hex")?;

    let key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .context("public key is not valid hex")?
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("public key must be 32 bytes"))?;
    let public_key = VerifyingKey::from_bytes(&key_bytes).context("invalid public key")?;

    let sig_bytes = hex::decode(signature_hex).context("signature is not valid hex")?;
    let Ok(signature) = Signature::try_from(sig_bytes.as_slice()) else {
        bail!("signature must be 64 bytes");
    };

    public_key
        .verify(&digest, &signature)
        .map_err(|_| anyhow!("signature does not match content hash"))
}
