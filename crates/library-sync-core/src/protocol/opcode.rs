//! Sub-channel numbers.

use serde::Serialize;
use std::fmt::{self, Display, Formatter};

/// Sub-channel a packet travels on. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum Opcode {
    SendToDevice = 101,
    SyncSubscriptions = 202,
    SyncHistory = 203,
    SyncSubscriptionGroups = 204,
    SyncPlaylists = 205,
    SyncWatchLater = 206,
}

impl Opcode {
    pub const ALL: [Opcode; 6] = [
        Opcode::SendToDevice,
        Opcode::SyncSubscriptions,
        Opcode::SyncHistory,
        Opcode::SyncSubscriptionGroups,
        Opcode::SyncPlaylists,
        Opcode::SyncWatchLater,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_u8() == byte)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::SendToDevice => "sendToDevice",
            Opcode::SyncSubscriptions => "syncSubscriptions",
            Opcode::SyncHistory => "syncHistory",
            Opcode::SyncSubscriptionGroups => "syncSubscriptionGroups",
            Opcode::SyncPlaylists => "syncPlaylists",
            Opcode::SyncWatchLater => "syncWatchLater",
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_u8(byte).ok_or(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_values() {
        assert_eq!(Opcode::SendToDevice.as_u8(), 101);
        assert_eq!(Opcode::SyncSubscriptions.as_u8(), 202);
        assert_eq!(Opcode::SyncWatchLater.as_u8(), 206);
    }

    #[test]
    fn test_from_u8() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
        assert_eq!(Opcode::from_u8(0), None);
        assert_eq!(Opcode::try_from(150u8), Err(150));
    }

    #[test]
    fn test_never_collides_with_json() {
        // Hello frames are JSON objects and start with '{'
        assert!(Opcode::from_u8(b'{').is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::SyncHistory.to_string(), "syncHistory(203)");
    }
}
