//! Verifier signing credential.
//!
//! Key files hold either 32 raw bytes or 64 hex characters (surrounding
//! whitespace ignored). Intermediate buffers are zeroized; the signing key
//! zeroizes itself on drop.

use attest_core::Address;
use ed25519_dalek::{Signer, SigningKey};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key length: {0} (expected 32 bytes or 64 hex characters)")]
    InvalidLength(usize),

    #[error("Invalid hex in key file: {0}")]
    InvalidHex(String),
}

/// The verifier's Ed25519 identity.
pub struct VerifierCredential {
    signing_key: SigningKey,
    address: Address,
}

impl VerifierCredential {
    /// Build from a 32-byte secret key.
    pub fn from_bytes(key_bytes: &[u8]) -> Result<Self, CredentialError> {
        if key_bytes.len() != 32 {
            return Err(CredentialError::InvalidLength(key_bytes.len()));
        }

        let mut key_array = [0u8; 32];
        key_array.copy_from_slice(key_bytes);
        let signing_key = SigningKey::from_bytes(&key_array);
        key_array.zeroize();

        let address = derive_address(signing_key.verifying_key().as_bytes());
        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Load a key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let mut raw = std::fs::read(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let result = if raw.len() == 32 {
            Self::from_bytes(&raw)
        } else {
            Self::from_hex_bytes(&raw)
        };
        raw.zeroize();
        result
    }

    fn from_hex_bytes(raw: &[u8]) -> Result<Self, CredentialError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| CredentialError::InvalidHex("key file is not text".to_string()))?
            .trim();
        let text = text.strip_prefix("0x").unwrap_or(text);
        if text.len() != 64 {
            return Err(CredentialError::InvalidLength(text.len()));
        }

        let mut decoded =
            hex::decode(text).map_err(|e| CredentialError::InvalidHex(e.to_string()))?;
        let result = Self::from_bytes(&decoded);
        decoded.zeroize();
        result
    }

    /// Fresh random key. Only suitable for dry-run operation.
    pub fn ephemeral() -> Self {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();

        let address = derive_address(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// Ledger address: first 20 bytes of BLAKE3(verifying key).
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for VerifierCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierCredential")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn derive_address(verifying_key: &[u8; 32]) -> Address {
    let hash = blake3::hash(verifying_key);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash.as_bytes()[..20]);
    Address(address)
}
