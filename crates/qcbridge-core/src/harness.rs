//! The harness façade: resolve, select, execute, normalize or classify.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::classify::classify;
use crate::discovery::{EngineDiscovery, SystemDiscovery};
use crate::dispatch::{self, EmbeddedEngine, RawEngineOutput, LEGACY_DATA_FILE, MODERN_DATA_FILE};
use crate::error::{HarnessError, Result};
use crate::normalize::normalize;
use crate::protocol::{self, ProtocolVariant};
use crate::schema::{CanonicalResult, ComputationRequest, TaskConfig};
use crate::scratch::ScratchScope;
use crate::version::{VersionCache, VersionResolver};
use crate::wire::{self, WireFormat};

/// Drives the engine on behalf of a caller speaking the canonical schema.
///
/// Holds no cross-call mutable state beyond the injected version cache.
/// Every non-success path of [`compute`](EngineHarness::compute) yields
/// exactly one taxonomy error, and the scratch directory is released on
/// every exit path.
pub struct EngineHarness {
    resolver: VersionResolver,
    embedded: Option<Arc<dyn EmbeddedEngine>>,
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineHarness {
    /// Harness against the real system, with a fresh version cache.
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SystemDiscovery), VersionCache::new())
    }

    /// Harness with injected discovery and cache, for embedding and tests.
    pub fn with_parts(discovery: Arc<dyn EngineDiscovery>, cache: VersionCache) -> Self {
        Self {
            resolver: VersionResolver::new(discovery, cache),
            embedded: None,
        }
    }

    /// Attach an in-process engine entry point for the embedded protocol.
    pub fn with_embedded(mut self, engine: Arc<dyn EmbeddedEngine>) -> Self {
        self.embedded = Some(engine);
        self
    }

    /// Resolve and return the installed engine's raw version string.
    pub async fn get_version(&self) -> Result<String> {
        Ok(self.resolver.resolve().await?.raw_version)
    }

    /// Run one computation synchronously (awaited to completion).
    pub async fn compute(
        &self,
        request: &ComputationRequest,
        config: &TaskConfig,
    ) -> Result<CanonicalResult> {
        let resolved = self.resolver.resolve().await?;
        let variant = protocol::select(&resolved.version, request)?;
        info!(
            version = %resolved.version,
            protocol = ?variant,
            driver = %request.driver,
            method = %request.model.method,
            "dispatching computation"
        );

        // Scratch is scope-owned: dropped on success, classified failure,
        // and unwinding alike.
        let scratch = ScratchScope::open(config.scratch_directory.as_deref())?;
        let derived = request.for_execution();
        let raw = dispatch::run(
            variant,
            &resolved.binary,
            &derived,
            config,
            scratch.path(),
            self.embedded.as_ref(),
        )
        .await?;

        self.finish(raw, variant, request, config)
    }

    fn finish(
        &self,
        raw: RawEngineOutput,
        variant: ProtocolVariant,
        request: &ComputationRequest,
        config: &TaskConfig,
    ) -> Result<CanonicalResult> {
        if !raw.success {
            let err = classify(&raw.stderr, Some("execution_error"));
            warn!(retryable = err.retryable(), "engine execution failed");
            return Err(err);
        }

        let payload = extract_payload(&raw, variant)?;
        if payload.get("success") != Some(&Value::Bool(true)) {
            let (message, error_type) = payload_error(&payload);
            let err = classify(&message, error_type.as_deref());
            warn!(retryable = err.retryable(), "engine reported an internal failure");
            return Err(err);
        }

        normalize(payload, request, config)
    }
}

/// Pull the protocol-specific result payload out of the raw output.
fn extract_payload(raw: &RawEngineOutput, variant: ProtocolVariant) -> Result<Value> {
    match variant {
        ProtocolVariant::LegacyFile => match raw.outfiles.get(LEGACY_DATA_FILE) {
            Some(file) => wire::from_bytes(file.as_bytes(), WireFormat::Json),
            None => Err(HarnessError::Unknown(format!(
                "engine exited cleanly but wrote no {LEGACY_DATA_FILE}"
            ))),
        },
        ProtocolVariant::ModernFile => match raw.outfiles.get(MODERN_DATA_FILE) {
            Some(file) => wire::from_bytes(file.as_bytes(), WireFormat::Msgpack),
            None => Err(HarnessError::Unknown(format!(
                "engine exited cleanly but wrote no {MODERN_DATA_FILE}"
            ))),
        },
        ProtocolVariant::Embedded => raw.payload.clone().ok_or_else(|| {
            HarnessError::Unknown("embedded engine returned no payload".to_string())
        }),
    }
}

/// Extract message and type from an explicit error payload. Malformed
/// error blocks (no `error_message` field) are surfaced whole.
fn payload_error(payload: &Value) -> (String, Option<String>) {
    let error = &payload["error"];
    match error.get("error_message").and_then(Value::as_str) {
        Some(message) => (
            message.to_string(),
            error
                .get("error_type")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        None => (error.to_string(), Some("internal_error".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::fakes::FixedDiscovery;
    use crate::exec::OutFile;
    use crate::schema::{ModelSpec, Molecule};
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;

    fn request() -> ComputationRequest {
        ComputationRequest::new(
            Molecule {
                symbols: vec!["He".into()],
                geometry: vec![0.0, 0.0, 0.0],
                molecular_charge: 0.0,
                molecular_multiplicity: 1,
            },
            "energy",
            ModelSpec {
                method: "scf".into(),
                basis: Some("cc-pvdz".into()),
            },
        )
    }

    async fn seeded_harness(raw_version: &str) -> EngineHarness {
        let binary = Path::new("/nonexistent/psi4");
        let cache = VersionCache::new();
        cache.insert(binary, raw_version.to_string()).await;
        EngineHarness::with_parts(
            Arc::new(FixedDiscovery::both(binary, Path::new("/nonexistent/module"))),
            cache,
        )
    }

    #[tokio::test]
    async fn test_unsupported_version_fails_before_any_execution() {
        let harness = seeded_harness("1.1").await;
        match harness.compute(&request(), &TaskConfig::default()).await {
            Err(HarnessError::UnsupportedVersion(v)) => assert_eq!(v, "1.1"),
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_untagged_build_fails_resolution() {
        let harness = seeded_harness("1.4a1.dev5+undef").await;
        match harness.compute(&request(), &TaskConfig::default()).await {
            Err(HarnessError::UntaggedBuild(_)) => {}
            other => panic!("expected UntaggedBuild, got {other:?}"),
        }
    }

    #[test]
    fn test_payload_error_with_structured_block() {
        let payload = json!({
            "success": false,
            "error": {"error_type": "ValidationError", "error_message": "bad keyword"}
        });
        let (message, error_type) = payload_error(&payload);
        assert_eq!(message, "bad keyword");
        assert_eq!(error_type.as_deref(), Some("ValidationError"));
    }

    #[test]
    fn test_payload_error_with_malformed_block_surfaced_whole() {
        let payload = json!({"success": false, "error": "it broke"});
        let (message, error_type) = payload_error(&payload);
        assert_eq!(message, "\"it broke\"");
        assert_eq!(error_type.as_deref(), Some("internal_error"));
    }

    #[test]
    fn test_extract_payload_legacy_missing_outfile_is_unknown() {
        let raw = RawEngineOutput {
            success: true,
            ..Default::default()
        };
        let err = extract_payload(&raw, ProtocolVariant::LegacyFile).unwrap_err();
        assert!(matches!(err, HarnessError::Unknown(_)));
    }

    #[test]
    fn test_extract_payload_modern_decodes_msgpack() {
        let value = json!({"success": true, "return_result": -2.85});
        let bytes = wire::to_bytes(&value, WireFormat::Msgpack).unwrap();
        let mut outfiles = HashMap::new();
        outfiles.insert(MODERN_DATA_FILE.to_string(), OutFile::Binary(bytes));
        let raw = RawEngineOutput {
            success: true,
            outfiles,
            ..Default::default()
        };
        let payload = extract_payload(&raw, ProtocolVariant::ModernFile).unwrap();
        assert_eq!(payload, value);
    }

    #[tokio::test]
    async fn test_engine_not_found_propagates() {
        let harness = EngineHarness::with_parts(
            Arc::new(FixedDiscovery::missing()),
            VersionCache::new(),
        );
        match harness.compute(&request(), &TaskConfig::default()).await {
            Err(HarnessError::EngineNotFound(_)) => {}
            other => panic!("expected EngineNotFound, got {other:?}"),
        }
    }
}
