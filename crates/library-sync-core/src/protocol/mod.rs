//! Wire protocol for library sync.
//!
//! - [`Opcode`]: the closed set of sub-channels a session multiplexes
//! - [`packets`]: the payload shape carried on each sub-channel
//! - [`envelope`]: `[opcode][flags][payload]` framing with optional gzip
//! - [`hello`]: the identity frame exchanged when a connection opens

pub mod envelope;
pub mod hello;
pub mod opcode;
pub mod packets;

pub use envelope::{CodecError, decode, decode_payload, encode, encode_payload};
pub use hello::{Hello, PROTOCOL_VERSION};
pub use opcode::Opcode;
pub use packets::{
    HistoryPacket, PlaylistsPacket, SendToDevicePacket, SubscriptionGroupsPacket,
    SubscriptionsPacket, SyncPacket, WatchLaterPacket,
};
