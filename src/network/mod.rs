//! Transport boundary for pack gossip.
//!
//! The engine only needs two things from the network: announce a pack it
//! accepted and fetch a pack it is missing by hash. [`Transport`] captures
//! that; inbound packs arrive as [`NetworkEvent`]s on a channel owned by the
//! node. Messages on the wire are length-prefixed bincode frames.

pub mod loopback;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_NETWORK_MESSAGE_BYTES;
use crate::{short, Hash};

pub use loopback::LoopbackTransport;

/// Frames exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Announce an encoded pack.
    Pack(Vec<u8>),
    /// Request a pack by its hash.
    GetPack(Hash),
    /// Response to [`Message::GetPack`].
    PackResponse(Option<Vec<u8>>),
}

/// Inbound events delivered to the node loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    PackReceived(Vec<u8>),
}

/// Network errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("message serialization failed: {0}")]
    SerializationFailed(String),
    #[error("message exceeds maximum size ({} bytes)", MAX_NETWORK_MESSAGE_BYTES)]
    MessageTooLarge,
    #[error("malformed message")]
    Malformed,
    #[error("pack {0} not found")]
    NotFound(String),
}

/// What the consensus engine needs from the network.
pub trait Transport: Send + Sync {
    /// Announce an encoded pack to every peer. Best effort.
    fn broadcast(&self, pack: &[u8]);

    /// Fetch an encoded pack by hash.
    fn query_by_hash(&self, hash: &Hash) -> Result<Vec<u8>, NetworkError>;
}

/// A transport with no peers: broadcasts vanish, queries find nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn broadcast(&self, _pack: &[u8]) {}

    fn query_by_hash(&self, hash: &Hash) -> Result<Vec<u8>, NetworkError> {
        Err(NetworkError::NotFound(short(hash)))
    }
}

/// Query `hash`, trying up to `retries` times (at least once).
pub fn query_pack(
    transport: &dyn Transport,
    hash: &Hash,
    retries: u32,
) -> Result<Vec<u8>, NetworkError> {
    let attempts = retries.max(1);
    let mut last = NetworkError::NotFound(short(hash));
    for attempt in 1..=attempts {
        match transport.query_by_hash(hash) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                tracing::debug!(pack = %short(hash), attempt, error = %e, "Pack query failed");
                last = e;
            }
        }
    }
    tracing::warn!(pack = %short(hash), attempts, "Pack query retries exhausted");
    Err(last)
}

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::legacy().with_limit::<MAX_NETWORK_MESSAGE_BYTES>()
}

/// `u32` little-endian payload length, then the bincode payload.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, NetworkError> {
    let payload = bincode::serde::encode_to_vec(msg, bincode_config())
        .map_err(|e| NetworkError::SerializationFailed(e.to_string()))?;
    if payload.len() > MAX_NETWORK_MESSAGE_BYTES {
        return Err(NetworkError::MessageTooLarge);
    }
    let len = (payload.len() as u32).to_le_bytes();
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Deserialize a length-prefixed message. Declared lengths above the limit
/// are rejected before anything is allocated.
pub fn decode_message(data: &[u8]) -> Result<Message, NetworkError> {
    let prefix: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(NetworkError::Malformed)?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_NETWORK_MESSAGE_BYTES {
        return Err(NetworkError::MessageTooLarge);
    }
    let payload = data.get(4..4 + len).ok_or(NetworkError::Malformed)?;
    let (msg, _) = bincode::serde::decode_from_slice(payload, bincode_config())
        .map_err(|_| NetworkError::Malformed)?;
    Ok(msg)
}
