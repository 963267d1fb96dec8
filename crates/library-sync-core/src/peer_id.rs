//! PeerId: the public identity of a device in the sync network.
//!
//! Wraps the base64 text of a 32-byte public key. The session layer hands us
//! this string after it has authenticated the remote device; we only validate
//! its shape and use it as a key (watermarks, logs, notifications).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Length in bytes of a decoded public key.
pub const PUBLIC_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum PeerIdError {
    #[error("Invalid peer ID: not base64 ({0})")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Invalid peer ID: expected {PUBLIC_KEY_LEN} key bytes, got {0}")]
    InvalidLength(usize),
}

/// Public identity of a remote (or the local) device.
///
/// # Examples
/// ```
/// use library_sync_core::PeerId;
///
/// let id = PeerId::generate();
/// let parsed: PeerId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut key = [0u8; PUBLIC_KEY_LEN];
        rand::rng().fill(&mut key);
        Self(STANDARD.encode(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bytes = STANDARD.decode(s)?;
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(PeerIdError::InvalidLength(bytes.len()));
        }
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Serialize as the plain base64 string so it reads the same in JSON and logs
impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_valid() {
        let id = PeerId::generate();
        assert_eq!(id.as_str().len(), 44);
        assert!(id.as_str().parse::<PeerId>().is_ok());
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(PeerId::generate(), PeerId::generate());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let id = PeerId::generate();
        let padded = format!("  {}\n", id);
        assert_eq!(padded.parse::<PeerId>().unwrap(), id);
    }

    #[test]
    fn test_reject_non_base64() {
        assert!(matches!(
            "not base64 at all!".parse::<PeerId>(),
            Err(PeerIdError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_reject_wrong_length() {
        let short = STANDARD.encode([7u8; 16]);
        assert!(matches!(
            short.parse::<PeerId>(),
            Err(PeerIdError::InvalidLength(16))
        ));
        assert!("".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_short_prefix() {
        let id = PeerId::generate();
        assert_eq!(id.short(), &id.as_str()[..8]);
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = PeerId::generate();
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(json, format!("\"{}\"", original));
        let parsed: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        assert!(serde_json::from_str::<PeerId>("\"abc\"").is_err());
    }
}
