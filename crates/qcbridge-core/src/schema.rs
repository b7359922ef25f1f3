//! Canonical request/result schema.
//!
//! These shapes mirror the QCSchema contract the caller speaks. The harness
//! never mutates a caller-supplied [`ComputationRequest`]; execution-time
//! adjustments (placeholder basis, injected reference keyword) are applied
//! to a derived copy via [`ComputationRequest::for_execution`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Schema tag carried by incoming requests.
pub const SCHEMA_INPUT: &str = "qcschema_input";
/// Schema tag the legacy protocol generation expects on staged input.
pub const SCHEMA_INPUT_LEGACY: &str = "qc_schema_input";
/// Schema tag every canonical result carries.
pub const SCHEMA_OUTPUT: &str = "qcschema_output";

/// Molecular system specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    /// Element symbols, one per atom.
    pub symbols: Vec<String>,

    /// Flattened cartesian coordinates (3 per atom), in Bohr.
    pub geometry: Vec<f64>,

    /// Total molecular charge.
    #[serde(default)]
    pub molecular_charge: f64,

    /// Spin multiplicity (2S + 1).
    #[serde(default = "default_multiplicity")]
    pub molecular_multiplicity: u32,
}

fn default_multiplicity() -> u32 {
    1
}

/// Method + basis pair describing the level of theory.
///
/// `basis` may legitimately be absent (composite methods carry their own),
/// but some engine protocol generations require it serialized as an empty
/// string rather than null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub method: String,
    pub basis: Option<String>,
}

/// Immutable description of one computation, owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationRequest {
    #[serde(default = "default_schema_name")]
    pub schema_name: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub molecule: Molecule,

    /// What to compute: "energy", "gradient", "hessian", ...
    pub driver: String,

    pub model: ModelSpec,

    /// Engine keyword options with caller-supplied arbitrary casing.
    #[serde(default)]
    pub keywords: HashMap<String, Value>,

    /// Open-ended engine-specific flags. The key `"psiapi"` set to `true`
    /// requests the embedded in-process call path.
    #[serde(default)]
    pub extras: HashMap<String, Value>,
}

fn default_schema_name() -> String {
    SCHEMA_INPUT.to_string()
}

fn default_schema_version() -> u32 {
    1
}

impl ComputationRequest {
    pub fn new(molecule: Molecule, driver: impl Into<String>, model: ModelSpec) -> Self {
        Self {
            schema_name: default_schema_name(),
            schema_version: default_schema_version(),
            molecule,
            driver: driver.into(),
            model,
            keywords: HashMap::new(),
            extras: HashMap::new(),
        }
    }

    /// Lower-cased keyword view for case-insensitive lookup. Built once per
    /// call; the caller's map keeps its original casing.
    pub fn caseless_keywords(&self) -> HashMap<String, Value> {
        self.keywords
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect()
    }

    /// Whether the extras mapping requests the embedded call path.
    pub fn wants_embedded(&self) -> bool {
        matches!(self.extras.get("psiapi"), Some(Value::Bool(true)))
    }

    /// Derived copy adjusted for execution:
    ///
    /// - a `None` basis becomes `""` (required by some protocol
    ///   generations; the original value is restored during
    ///   normalization);
    /// - open-shell systems without an explicit `reference` keyword get
    ///   `reference = "uhf"` injected.
    ///
    /// The caller's request is left untouched.
    pub fn for_execution(&self) -> ComputationRequest {
        let mut derived = self.clone();
        if derived.model.basis.is_none() {
            derived.model.basis = Some(String::new());
        }
        if self.molecule.molecular_multiplicity != 1
            && !self.caseless_keywords().contains_key("reference")
        {
            derived
                .keywords
                .insert("reference".to_string(), Value::String("uhf".to_string()));
        }
        derived
    }
}

/// Execution resource envelope, supplied per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Core count handed to the engine.
    pub ncores: usize,

    /// Memory budget in gigabytes; the harness converts to engine-native
    /// units per protocol.
    pub memory_gb: f64,

    /// Explicit scratch root, if any. Falls back to the engine scratch
    /// environment variable, then the platform temp root.
    pub scratch_directory: Option<std::path::PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            ncores: 1,
            memory_gb: 1.0,
            scratch_directory: None,
        }
    }
}

/// Error payload embedded in an engine result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnginePayloadError {
    pub error_type: String,
    pub error_message: String,
}

/// Resource-usage metadata attached to every canonical result.
///
/// `memory` and `nthreads` always reflect the [`TaskConfig`] actually used
/// for the call, never values echoed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Provenance {
    #[serde(default)]
    pub creator: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine: Option<String>,

    #[serde(default)]
    pub memory: f64,

    #[serde(default)]
    pub nthreads: usize,
}

/// The canonical result shape the caller expects back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResult {
    pub schema_name: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub molecule: Molecule,

    pub driver: String,

    pub model: ModelSpec,

    #[serde(default)]
    pub keywords: HashMap<String, Value>,

    /// Engine-specific side payloads (e.g. internal named variables).
    #[serde(default)]
    pub extras: HashMap<String, Value>,

    pub success: bool,

    #[serde(default)]
    pub return_result: Value,

    #[serde(default)]
    pub properties: Value,

    pub provenance: Provenance,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnginePayloadError>,
}
