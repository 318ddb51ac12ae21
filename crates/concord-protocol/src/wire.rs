//! Byte codecs for the shared types: MessagePack for the compact replay file,
//! JSON for human-readable interchange.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::{ReplayFile, REPLAY_VERSION};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("msgpack encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported replay version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

pub fn encode_replay(replay: &ReplayFile) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec(replay)?)
}

pub fn decode_replay(bytes: &[u8]) -> Result<ReplayFile, WireError> {
    let replay: ReplayFile = rmp_serde::from_slice(bytes)?;
    if replay.version != REPLAY_VERSION {
        return Err(WireError::UnsupportedVersion {
            found: replay.version,
            expected: REPLAY_VERSION,
        });
    }
    Ok(replay)
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<String, WireError> {
    Ok(serde_json::to_string(value)?)
}

pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, WireError> {
    Ok(serde_json::from_str(text)?)
}

/// FNV-1a, 64-bit. Used to hash text seeds and to fingerprint states in logs.
pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
