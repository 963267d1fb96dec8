//! Versioned hello frame.
//!
//! Sent by both sides immediately after a transport connection opens, before
//! any envelope frames. It carries:
//! - Protocol version for forward compatibility
//! - The sender's public identity
//! - An optional human-readable device name (used in notifications)
//!
//! Hello frames are JSON objects, so they always start with `{`. No opcode
//! uses that byte value, which keeps the two frame kinds distinguishable.

use crate::PeerId;
use serde::{Deserialize, Serialize};

/// Current protocol version.
///
/// Increment when making breaking changes to the packet shapes.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    /// Message type discriminator
    #[serde(rename = "type")]
    pub msg_type: String,
    pub version: u32,
    pub peer_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl Hello {
    pub fn new(peer_id: PeerId, device_name: Option<String>) -> Self {
        Self {
            msg_type: "hello".to_string(),
            version: PROTOCOL_VERSION,
            peer_id,
            device_name,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Hello serialization should not fail")
    }

    /// Try to parse from JSON bytes.
    ///
    /// Returns `None` for non-JSON input or if the `type` field isn't `"hello"`.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        let hello: Self = serde_json::from_slice(data).ok()?;
        if hello.msg_type == "hello" {
            Some(hello)
        } else {
            None
        }
    }

    /// Check if we should log a version mismatch warning.
    ///
    /// Mismatched versions are still accepted; unknown fields are ignored and
    /// missing ones default.
    pub fn should_warn_version(&self) -> bool {
        self.version != PROTOCOL_VERSION
    }

    /// Name to show for this peer.
    pub fn display_name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| self.peer_id.short().to_string())
    }
}

/// Quick check if a frame looks like a hello (JSON object).
pub fn is_likely_hello(data: &[u8]) -> bool {
    data.first() == Some(&b'{')
}
