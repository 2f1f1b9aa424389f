use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Stable 64-bit name of a registered substrate.
///
/// Derived from the registration name: the first eight bytes (big-endian) of
/// its SHA-256 digest. Crosses the wire as a 16-character lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(u64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identity '{raw}': expected 16 hex digits")]
pub struct IdentityParseError {
    pub raw: String,
}

impl Identity {
    #[must_use]
    pub fn derive(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(head))
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn parse_hex(raw: &str) -> Result<Self, IdentityParseError> {
        let trimmed = raw.trim();
        if trimmed.len() != 16 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdentityParseError {
                raw: raw.to_string(),
            });
        }
        u64::from_str_radix(trimmed, 16)
            .map(Self)
            .map_err(|_| IdentityParseError {
                raw: raw.to_string(),
            })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_hex(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.to_hex()
    }
}

/// SHA-256 digest of a canonicalized parameter map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamsHash([u8; 32]);

impl ParamsHash {
    #[must_use]
    pub fn of(canonical: &[u8]) -> Self {
        Self(Sha256::digest(canonical).into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Leading 64 bits, for places that only need a short fingerprint.
    #[must_use]
    pub fn short(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }
}

impl Serialize for ParamsHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for ParamsHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
