//! Envelope codec for sync packets.
//!
//! A frame on the wire is `[opcode][flags][body]`:
//! - `opcode`: the sub-channel (see [`Opcode`])
//! - `flags`: bit 0 set means `body` is gzip-compressed
//! - `body`: the packet as UTF-8 JSON
//!
//! Sessions send the `(opcode, payload)` pair where `payload` is
//! `[flags][body]`; the transport prefixes the opcode byte.

use super::Opcode;
use super::packets::{
    HistoryPacket, PlaylistsPacket, SendToDevicePacket, SubscriptionGroupsPacket,
    SubscriptionsPacket, SyncPacket, WatchLaterPacket,
};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use thiserror::Error;

/// Bodies larger than this are gzip-compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Upper bound for a decompressed body (64 MiB).
pub const MAX_BODY_SIZE: u64 = 64 * 1024 * 1024;

const FLAG_GZIP: u8 = 0x01;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u8),

    #[error("Frame truncated: missing flags byte")]
    Truncated,

    #[error("Unsupported flags: {0:#04x}")]
    UnsupportedFlags(u8),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompressed body exceeds {MAX_BODY_SIZE} bytes")]
    TooLarge,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;

fn body_json(packet: &SyncPacket) -> Result<Vec<u8>> {
    let body = match packet {
        SyncPacket::Subscriptions(p) => serde_json::to_vec(p)?,
        SyncPacket::SubscriptionGroups(p) => serde_json::to_vec(p)?,
        SyncPacket::Playlists(p) => serde_json::to_vec(p)?,
        SyncPacket::WatchLater(p) => serde_json::to_vec(p)?,
        SyncPacket::History(p) => serde_json::to_vec(p)?,
        SyncPacket::SendToDevice(p) => serde_json::to_vec(p)?,
    };
    Ok(body)
}

/// Encode a packet into its sub-channel and `[flags][body]` payload.
pub fn encode_payload(packet: &SyncPacket) -> Result<(Opcode, Vec<u8>)> {
    let body = body_json(packet)?;

    let mut payload = Vec::with_capacity(body.len() + 1);
    if body.len() > COMPRESSION_THRESHOLD {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&body)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        payload.push(FLAG_GZIP);
        payload.extend_from_slice(&compressed);
    } else {
        payload.push(0);
        payload.extend_from_slice(&body);
    }

    Ok((packet.opcode(), payload))
}

/// Encode a packet into a complete frame.
pub fn encode(packet: &SyncPacket) -> Result<Vec<u8>> {
    let (opcode, payload) = encode_payload(packet)?;
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(opcode.as_u8());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a complete frame.
pub fn decode(frame: &[u8]) -> Result<SyncPacket> {
    let (&op, payload) = frame.split_first().ok_or(CodecError::Empty)?;
    let opcode = Opcode::from_u8(op).ok_or(CodecError::UnknownOpcode(op))?;
    decode_payload(opcode, payload)
}

/// Decode a `[flags][body]` payload received on `opcode`.
pub fn decode_payload(opcode: Opcode, payload: &[u8]) -> Result<SyncPacket> {
    let (&flags, body) = payload.split_first().ok_or(CodecError::Truncated)?;
    if flags & !FLAG_GZIP != 0 {
        return Err(CodecError::UnsupportedFlags(flags));
    }

    let inflated;
    let json: &[u8] = if flags & FLAG_GZIP != 0 {
        inflated = inflate(body)?;
        &inflated
    } else {
        body
    };

    let packet = match opcode {
        Opcode::SyncSubscriptions => {
            SyncPacket::Subscriptions(serde_json::from_slice::<SubscriptionsPacket>(json)?)
        }
        Opcode::SyncSubscriptionGroups => SyncPacket::SubscriptionGroups(
            serde_json::from_slice::<SubscriptionGroupsPacket>(json)?,
        ),
        Opcode::SyncPlaylists => {
            SyncPacket::Playlists(serde_json::from_slice::<PlaylistsPacket>(json)?)
        }
        Opcode::SyncWatchLater => {
            SyncPacket::WatchLater(serde_json::from_slice::<WatchLaterPacket>(json)?)
        }
        Opcode::SyncHistory => SyncPacket::History(serde_json::from_slice::<HistoryPacket>(json)?),
        Opcode::SendToDevice => {
            SyncPacket::SendToDevice(serde_json::from_slice::<SendToDevicePacket>(json)?)
        }
    };
    Ok(packet)
}

fn inflate(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(body)
        .take(MAX_BODY_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    if out.len() as u64 > MAX_BODY_SIZE {
        return Err(CodecError::TooLarge);
    }
    Ok(out)
}
