//! Raw payload to canonical result conversion.
//!
//! Only runs on successful payloads. Repairs generation-specific schema
//! tags, relocates the engine's side-channel variable block into extras,
//! strips transport-only fields, restores the caller's original basis, and
//! stamps provenance with the resources actually granted to the call.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::schema::{CanonicalResult, ComputationRequest, TaskConfig, SCHEMA_OUTPUT};

/// Key under which the engine emits internal named variables alongside the
/// main payload.
const SIDE_CHANNEL_KEY: &str = "psi4:qcvars";

/// Canonical extras key for the relocated variable block.
const QCVARS_KEY: &str = "qcvars";

/// Disambiguating key used when `qcvars` is already occupied by unrelated
/// caller data.
const QCVARS_FALLBACK_KEY: &str = "local_qcvars";

/// Convert a successful raw payload into the canonical result shape.
///
/// `request` is the caller's original request (not the execution-derived
/// copy); its basis value is restored verbatim, and `config` overwrites the
/// provenance resource fields no matter what the engine echoed.
pub fn normalize(
    mut payload: Value,
    request: &ComputationRequest,
    config: &TaskConfig,
) -> Result<CanonicalResult> {
    let object = payload
        .as_object_mut()
        .ok_or_else(|| HarnessError::Unknown("engine payload is not an object".to_string()))?;

    // Schema-name tags differ between protocol generations.
    object.insert(
        "schema_name".to_string(),
        Value::from(SCHEMA_OUTPUT),
    );

    relocate_side_channel(object)?;

    // Transport-only fields must not leak into the canonical schema.
    object.remove("memory");
    object.remove("nthreads");
    object.remove("return_output");
    if let Some(raw_output) = object.remove("raw_output") {
        if !raw_output.is_null() {
            object.insert("stdout".to_string(), raw_output);
        }
    }

    // Restore the caller's basis, placeholder or not.
    let basis = match &request.model.basis {
        Some(basis) => Value::from(basis.clone()),
        None => Value::Null,
    };
    match object.get_mut("model") {
        Some(Value::Object(model)) => {
            model.insert("basis".to_string(), basis);
        }
        _ => {
            return Err(HarnessError::Unknown(
                "engine payload has no model block".to_string(),
            ))
        }
    }

    // Provenance reflects the task config actually used, never echoes.
    let provenance = object
        .entry("provenance".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match provenance.as_object_mut() {
        Some(provenance) => {
            provenance.insert(
                "memory".to_string(),
                Value::from((config.memory_gb * 1000.0).round() / 1000.0),
            );
            provenance.insert("nthreads".to_string(), Value::from(config.ncores));
        }
        None => {
            return Err(HarnessError::Unknown(
                "engine payload provenance is not an object".to_string(),
            ))
        }
    }

    debug!("payload normalized to canonical schema");
    Ok(serde_json::from_value(payload)?)
}

/// Move the engine's side-channel variable block into extras, merging
/// rather than overwriting. If both the primary and the fallback key are
/// already occupied, fail loudly instead of silently dropping data.
fn relocate_side_channel(object: &mut Map<String, Value>) -> Result<()> {
    let Some(qcvars) = object.remove(SIDE_CHANNEL_KEY) else {
        return Ok(());
    };

    if !object.get("extras").map(Value::is_object).unwrap_or(false) {
        object.insert("extras".to_string(), Value::Object(Map::new()));
    }
    let extras = object
        .get_mut("extras")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| HarnessError::Unknown("extras is not an object".to_string()))?;

    if !extras.contains_key(QCVARS_KEY) {
        extras.insert(QCVARS_KEY.to_string(), qcvars);
    } else if !extras.contains_key(QCVARS_FALLBACK_KEY) {
        extras.insert(QCVARS_FALLBACK_KEY.to_string(), qcvars);
    } else {
        return Err(HarnessError::Unknown(format!(
            "cannot relocate engine variables: extras already holds both \
             '{QCVARS_KEY}' and '{QCVARS_FALLBACK_KEY}'"
        )));
    }
    Ok(())
}
