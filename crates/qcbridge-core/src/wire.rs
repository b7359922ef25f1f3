//! Serialization collaborator for the two file-exchange formats.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{HarnessError, Result};

/// Wire formats the engine's file protocols speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Legacy text protocol.
    Json,
    /// Modern compact binary protocol.
    Msgpack,
}

/// Encode a value for staging into the scratch directory.
pub fn to_bytes<T: Serialize>(value: &T, format: WireFormat) -> Result<Vec<u8>> {
    match format {
        WireFormat::Json => Ok(serde_json::to_vec(value)?),
        WireFormat::Msgpack => rmp_serde::to_vec_named(value)
            .map_err(|e| HarnessError::WireDecode(format!("msgpack encode: {e}"))),
    }
}

/// Decode an output file the engine wrote back.
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8], format: WireFormat) -> Result<T> {
    match format {
        WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
        WireFormat::Msgpack => rmp_serde::from_slice(bytes)
            .map_err(|e| HarnessError::WireDecode(format!("msgpack decode: {e}"))),
    }
}
