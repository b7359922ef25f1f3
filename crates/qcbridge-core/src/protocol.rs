//! Version-gated protocol selection.
//!
//! The engine's invocation style and wire format changed across releases.
//! [`select`] maps a resolved version (plus the request's extras) onto one
//! protocol variant, chosen once; the dispatcher then matches on it.

use crate::error::{HarnessError, Result};
use crate::schema::ComputationRequest;
use crate::version::EngineVersion;

/// One supported combination of invocation style and wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// JSON-in/JSON-out via staged files (`--json data.json`).
    LegacyFile,
    /// MessagePack file exchange (`--qcschema data.msgpack`).
    ModernFile,
    /// Direct in-process invocation; no file staging.
    Embedded,
}

/// Pick the protocol for a resolved engine version.
///
/// Pure over the version thresholds: versions below the minimum supported
/// release are rejected outright; the embedded path is only offered at or
/// above the modern threshold and only when the request asks for it.
pub fn select(version: &EngineVersion, request: &ComputationRequest) -> Result<ProtocolVariant> {
    if *version < EngineVersion::minimum_supported() {
        return Err(HarnessError::UnsupportedVersion(version.to_string()));
    }
    if *version < EngineVersion::modern_threshold() {
        return Ok(ProtocolVariant::LegacyFile);
    }
    if request.wants_embedded() {
        Ok(ProtocolVariant::Embedded)
    } else {
        Ok(ProtocolVariant::ModernFile)
    }
}
