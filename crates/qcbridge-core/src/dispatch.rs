//! Execution dispatch: one pure match over the selected protocol.
//!
//! File protocols stage the serialized request into the scratch directory
//! and invoke the engine binary with generation-specific arguments. The
//! embedded protocol calls an in-process entry point, with the engine's
//! default working path overridden for the duration of the call and
//! restored afterwards regardless of outcome.
//!
//! A failing engine run is never a harness fault here: it comes back as a
//! [`RawEngineOutput`] with `success = false` and is classified later.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::exec::{self, OutFile};
use crate::protocol::ProtocolVariant;
use crate::schema::{ComputationRequest, TaskConfig, SCHEMA_INPUT, SCHEMA_INPUT_LEGACY};
use crate::wire::{self, WireFormat};

/// Logical input/output file name for the legacy JSON protocol.
pub const LEGACY_DATA_FILE: &str = "data.json";

/// Logical input/output file name for the modern binary protocol.
pub const MODERN_DATA_FILE: &str = "data.msgpack";

/// The engine's unmediated response to one invocation.
#[derive(Debug, Clone, Default)]
pub struct RawEngineOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub outfiles: HashMap<String, OutFile>,
    /// Result payload from the embedded path, which has no output files.
    pub payload: Option<Value>,
}

/// In-process entry point of an embedded engine library.
///
/// The dispatcher configures threads, memory, and the default working path
/// before [`run_schema`](EmbeddedEngine::run_schema) and restores the prior
/// working path afterwards. A faulting call reports its message through the
/// `Err` arm and is classified like any other engine failure.
#[async_trait]
pub trait EmbeddedEngine: Send + Sync {
    async fn set_num_threads(&self, ncores: usize);
    async fn set_memory_gb(&self, memory_gb: f64);
    async fn default_scratch_path(&self) -> PathBuf;
    async fn set_default_scratch_path(&self, path: &Path);
    async fn run_schema(&self, input: Value) -> std::result::Result<Value, String>;
}

/// Arguments for the legacy JSON file protocol.
pub fn legacy_argv(engine: &Path, scratch: &Path) -> Vec<String> {
    vec![
        engine.display().to_string(),
        "--scratch".to_string(),
        scratch.display().to_string(),
        "--json".to_string(),
        LEGACY_DATA_FILE.to_string(),
    ]
}

/// Arguments for the modern binary file protocol.
pub fn modern_argv(engine: &Path, scratch: &Path, config: &TaskConfig) -> Vec<String> {
    vec![
        engine.display().to_string(),
        "--scratch".to_string(),
        scratch.display().to_string(),
        "--nthread".to_string(),
        config.ncores.to_string(),
        "--memory".to_string(),
        format!("{}GB", config.memory_gb),
        "--qcschema".to_string(),
        MODERN_DATA_FILE.to_string(),
    ]
}

/// Legacy staged input: the request dict plus transport directives the old
/// protocol reads from the payload itself. Memory rides along in bytes at
/// 95% of the budget; the normalizer strips these fields on the way back.
pub fn legacy_input(request: &ComputationRequest, config: &TaskConfig) -> Result<Value> {
    let mut input = serde_json::to_value(request)?;
    input["nthreads"] = Value::from(config.ncores);
    input["memory"] = Value::from((config.memory_gb * 0.95 * 1024.0 * 1024.0 * 1024.0) as u64);
    input["success"] = Value::from(false);
    input["return_output"] = Value::from(true);
    if input["schema_name"] == Value::from(SCHEMA_INPUT) {
        input["schema_name"] = Value::from(SCHEMA_INPUT_LEGACY);
    }
    Ok(input)
}

/// Invoke the engine for one request under the selected protocol.
///
/// `request` must already be the execution-derived copy (placeholder basis,
/// injected reference keyword); the caller keeps the original for
/// normalization.
pub async fn run(
    protocol: ProtocolVariant,
    engine: &Path,
    request: &ComputationRequest,
    config: &TaskConfig,
    scratch: &Path,
    embedded: Option<&Arc<dyn EmbeddedEngine>>,
) -> Result<RawEngineOutput> {
    match protocol {
        ProtocolVariant::LegacyFile => run_legacy(engine, request, config, scratch).await,
        ProtocolVariant::ModernFile => run_modern(engine, request, config, scratch).await,
        ProtocolVariant::Embedded => {
            let engine = embedded.ok_or_else(|| {
                HarnessError::Input(
                    "embedded call requested but no in-process engine is configured".to_string(),
                )
            })?;
            run_embedded(engine.as_ref(), request, config, scratch).await
        }
    }
}

async fn run_legacy(
    engine: &Path,
    request: &ComputationRequest,
    config: &TaskConfig,
    scratch: &Path,
) -> Result<RawEngineOutput> {
    let input = legacy_input(request, config)?;
    let staged = vec![(
        LEGACY_DATA_FILE.to_string(),
        wire::to_bytes(&input, WireFormat::Json)?,
    )];
    let argv = legacy_argv(engine, scratch);
    let out = exec::execute(&argv, &staged, &[LEGACY_DATA_FILE], &[], scratch).await?;
    Ok(RawEngineOutput {
        success: out.success,
        stdout: out.stdout,
        stderr: out.stderr,
        outfiles: out.outfiles,
        payload: None,
    })
}

async fn run_modern(
    engine: &Path,
    request: &ComputationRequest,
    config: &TaskConfig,
    scratch: &Path,
) -> Result<RawEngineOutput> {
    let staged = vec![(
        MODERN_DATA_FILE.to_string(),
        wire::to_bytes(request, WireFormat::Msgpack)?,
    )];
    let argv = modern_argv(engine, scratch, config);
    let out = exec::execute(
        &argv,
        &staged,
        &[MODERN_DATA_FILE],
        &[MODERN_DATA_FILE],
        scratch,
    )
    .await?;
    Ok(RawEngineOutput {
        success: out.success,
        stdout: out.stdout,
        stderr: out.stderr,
        outfiles: out.outfiles,
        payload: None,
    })
}

async fn run_embedded(
    engine: &dyn EmbeddedEngine,
    request: &ComputationRequest,
    config: &TaskConfig,
    scratch: &Path,
) -> Result<RawEngineOutput> {
    let input = serde_json::to_value(request)?;

    // Scoped override of the engine's default working path: capture, set,
    // and restore on both arms before the outcome is inspected.
    let prior_scratch = engine.default_scratch_path().await;
    engine.set_num_threads(config.ncores).await;
    engine.set_memory_gb(config.memory_gb).await;
    engine.set_default_scratch_path(scratch).await;

    let outcome = engine.run_schema(input).await;

    engine.set_default_scratch_path(&prior_scratch).await;

    match outcome {
        Ok(mut payload) => {
            mark_embedded_evaluated(&mut payload);
            debug!("embedded engine call returned a payload");
            Ok(RawEngineOutput {
                success: true,
                payload: Some(payload),
                ..Default::default()
            })
        }
        Err(message) => {
            warn!("embedded engine call faulted");
            Ok(RawEngineOutput {
                success: false,
                stderr: message,
                ..Default::default()
            })
        }
    }
}

fn mark_embedded_evaluated(payload: &mut Value) {
    // Non-object payloads are rejected later by normalization.
    let Some(object) = payload.as_object_mut() else {
        return;
    };
    let extras = object
        .entry("extras".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(extras) = extras.as_object_mut() {
        extras.insert("psiapi_evaluated".to_string(), Value::from(true));
    }
}
