//! Ledger-facing identifiers and the attestation event shape.
//!
//! Identifiers are fixed-size byte arrays that display as `0x`-prefixed
//! lowercase hex and serialize as hex strings, so they round-trip through
//! JSON-RPC payloads and the audit store unchanged.

use crate::error::CoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! fixed_hex {
    ($(#[$meta:meta])* $name:ident, $len:expr, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width of the identifier in bytes
            pub const LEN: usize = $len;

            /// All-zero value
            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Lowercase hex without the `0x` prefix
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Build from a byte slice of exactly the right width
            pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| CoreError::InvalidHex {
                    kind: $kind,
                    reason: format!("expected {} bytes, got {}", $len, bytes.len()),
                })?;
                Ok(Self(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                let digits = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                    .unwrap_or(trimmed);
                let bytes = hex::decode(digits).map_err(|e| CoreError::InvalidHex {
                    kind: $kind,
                    reason: e.to_string(),
                })?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_hex!(
    /// 32-byte attestation identifier, unique and immutable once emitted.
    AttestationId,
    32,
    "attestation id"
);

fixed_hex!(
    /// 20-byte ledger account address.
    Address,
    20,
    "address"
);

fixed_hex!(
    /// 32-byte transaction hash.
    TxHash,
    32,
    "transaction hash"
);

impl AttestationId {
    /// Shortened form for log lines (`0x` plus the first 8 hex digits).
    pub fn short(&self) -> String {
        format!("0x{}", &self.to_hex()[..8])
    }
}

/// Watermark of the last ledger block fully observed by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl Cursor {
    /// Block height this cursor points at.
    pub fn block(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An `AttestationSubmitted` event as emitted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationEvent {
    /// Attestation identifier
    #[serde(rename = "attestation_id")]
    pub id: AttestationId,
    /// Submitting agent
    pub agent: Address,
    /// Free-form attestation category
    pub category: String,
    /// Ledger timestamp (seconds)
    pub observed_at: u64,
    /// Block the event was emitted in
    pub block_number: u64,
}

/// On-chain state of an attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    /// Awaiting a verdict
    Pending,
    /// Verified by some verifier
    Verified,
    /// Rejected by some verifier
    Rejected,
    /// The ledger does not know this attestation
    Unknown,
}

impl AttestationStatus {
    /// Whether a verdict has already been written for this attestation.
    pub fn is_final(&self) -> bool {
        matches!(self, AttestationStatus::Verified | AttestationStatus::Rejected)
    }
}
