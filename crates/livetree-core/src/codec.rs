//! Wire codecs for op streams and snapshots.
//!
//! Two renderings of the same field set: human-readable JSON and compact
//! CBOR. Peers must agree on the rendering per channel; the engine itself is
//! codec-agnostic.

use crate::ops::Op;
use crate::serialization::Snapshot;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cbor encode failed: {0}")]
    CborEncode(String),
    #[error("cbor decode failed: {0}")]
    CborDecode(String),
}

pub fn encode_ops_json(ops: &[Op]) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(ops)?)
}

pub fn decode_ops_json(bytes: &[u8]) -> Result<Vec<Op>, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_ops_cbor(ops: &[Op]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(&ops, &mut out).map_err(|e| CodecError::CborEncode(e.to_string()))?;
    Ok(out)
}

pub fn decode_ops_cbor(bytes: &[u8]) -> Result<Vec<Op>, CodecError> {
    ciborium::de::from_reader(bytes).map_err(|e: ciborium::de::Error<std::io::Error>| {
        CodecError::CborDecode(e.to_string())
    })
}

pub fn encode_snapshot_json(snapshot: &Snapshot) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(snapshot)?)
}

pub fn decode_snapshot_json(bytes: &[u8]) -> Result<Snapshot, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_snapshot_cbor(snapshot: &Snapshot) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(snapshot, &mut out)
        .map_err(|e| CodecError::CborEncode(e.to_string()))?;
    Ok(out)
}

pub fn decode_snapshot_cbor(bytes: &[u8]) -> Result<Snapshot, CodecError> {
    ciborium::de::from_reader(bytes).map_err(|e: ciborium::de::Error<std::io::Error>| {
        CodecError::CborDecode(e.to_string())
    })
}
