//! End-to-end compute tests against a scripted fake engine.
//!
//! The fake engine is a shell script that answers the version probe and
//! overwrites the staged data file with a canned result, which exercises
//! the full resolve -> select -> stage -> dispatch -> normalize path
//! without a real engine installation.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use qcbridge_core::wire::{self, WireFormat};
use qcbridge_core::{
    ComputationRequest, EngineDiscovery, EngineHarness, HarnessError, ModelSpec, Molecule,
    TaskConfig, VersionCache,
};

struct FakeDiscovery {
    binary: PathBuf,
}

impl EngineDiscovery for FakeDiscovery {
    fn locate(&self, _name: &str) -> Option<PathBuf> {
        Some(self.binary.clone())
    }

    fn locate_importable(&self, _name: &str) -> Option<PathBuf> {
        // Pretend both install forms exist so no reconciliation probes run.
        Some(self.binary.clone())
    }
}

fn write_engine_script(dir: &Path, version: &str, body: &str) -> PathBuf {
    let path = dir.join("psi4");
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo {version}; exit 0; fi\n{body}\n"
    );
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn harness_for(binary: PathBuf) -> EngineHarness {
    EngineHarness::with_parts(Arc::new(FakeDiscovery { binary }), VersionCache::new())
}

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
            basis: None,
        },
    )
}

fn config(scratch_root: &Path) -> TaskConfig {
    TaskConfig {
        ncores: 3,
        memory_gb: 1.75,
        scratch_directory: Some(scratch_root.to_path_buf()),
    }
}

fn success_payload() -> Value {
    json!({
        "schema_name": "qc_schema_input",
        "schema_version": 1,
        "molecule": {"symbols": ["He"], "geometry": [0.0, 0.0, 0.0]},
        "driver": "energy",
        "model": {"method": "scf", "basis": ""},
        "keywords": {},
        "extras": {},
        "success": true,
        "return_result": -2.85,
        "properties": {"scf_total_energy": -2.85},
        "psi4:qcvars": {"CURRENT ENERGY": -2.85},
        "provenance": {"creator": "Psi4", "version": "1.3.2", "memory": 0.5, "nthreads": 1},
        "memory": 1785997230u64,
        "nthreads": 1,
        "return_output": true,
        "raw_output": "engine log\n"
    })
}

#[tokio::test]
async fn test_legacy_compute_end_to_end() {
    let fixture = TempDir::new().unwrap();
    let response = fixture.path().join("response.json");
    std::fs::write(&response, serde_json::to_vec(&success_payload()).unwrap()).unwrap();

    let args_log = fixture.path().join("args.txt");
    let body = format!(
        "echo \"$@\" > {}\ncp {} data.json",
        args_log.display(),
        response.display()
    );
    let binary = write_engine_script(fixture.path(), "1.3.2", &body);

    let scratch_root = TempDir::new().unwrap();
    let harness = harness_for(binary);
    let result = harness
        .compute(&request(), &config(scratch_root.path()))
        .await
        .expect("compute");

    assert!(result.success);
    assert_eq!(result.schema_name, "qcschema_output");
    assert_eq!(result.model.basis, None, "original basis restored");
    assert_eq!(result.provenance.nthreads, 3);
    assert_eq!(result.provenance.memory, 1.75);
    assert_eq!(result.extras["qcvars"]["CURRENT ENERGY"], json!(-2.85));
    assert_eq!(result.stdout.as_deref(), Some("engine log\n"));

    let args = std::fs::read_to_string(&args_log).unwrap();
    assert!(args.contains("--json data.json"), "args were: {args}");
    assert!(args.contains("--scratch"), "args were: {args}");

    // Scratch scope released: nothing left under the root.
    let leftovers: Vec<_> = std::fs::read_dir(scratch_root.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch directory leaked");
}

#[tokio::test]
async fn test_modern_compute_end_to_end() {
    let fixture = TempDir::new().unwrap();
    let mut payload = success_payload();
    // The modern generation does not carry legacy transport fields.
    payload.as_object_mut().unwrap().remove("raw_output");
    payload.as_object_mut().unwrap().remove("return_output");
    let response = fixture.path().join("response.msgpack");
    std::fs::write(&response, wire::to_bytes(&payload, WireFormat::Msgpack).unwrap()).unwrap();

    let args_log = fixture.path().join("args.txt");
    let body = format!(
        "echo \"$@\" > {}\ncp {} data.msgpack",
        args_log.display(),
        response.display()
    );
    let binary = write_engine_script(fixture.path(), "1.4a2.dev200", &body);

    let scratch_root = TempDir::new().unwrap();
    let harness = harness_for(binary);
    let result = harness
        .compute(&request(), &config(scratch_root.path()))
        .await
        .expect("compute");

    assert!(result.success);
    assert_eq!(result.provenance.nthreads, 3, "config wins over echo");
    assert_eq!(result.provenance.memory, 1.75);
    assert_eq!(result.model.basis, None);

    let args = std::fs::read_to_string(&args_log).unwrap();
    assert!(args.contains("--qcschema data.msgpack"), "args were: {args}");
    assert!(args.contains("--nthread 3"), "args were: {args}");
    assert!(args.contains("--memory 1.75GB"), "args were: {args}");
}

#[tokio::test]
async fn test_engine_crash_classified_from_stderr() {
    let fixture = TempDir::new().unwrap();
    let body = "echo 'PSIO Error: cannot write to scratch directory' >&2\nexit 1";
    let binary = write_engine_script(fixture.path(), "1.3.2", body);

    let scratch_root = TempDir::new().unwrap();
    let harness = harness_for(binary);
    match harness
        .compute(&request(), &config(scratch_root.path()))
        .await
    {
        Err(HarnessError::Resource(msg)) => assert!(msg.contains("scratch directory")),
        other => panic!("expected Resource error, got {other:?}"),
    }

    // Scratch released on the failure path too.
    let leftovers: Vec<_> = std::fs::read_dir(scratch_root.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch directory leaked on failure");
}

#[tokio::test]
async fn test_engine_internal_error_payload_classified() {
    let fixture = TempDir::new().unwrap();
    let mut payload = success_payload();
    payload["success"] = json!(false);
    payload["error"] = json!({
        "error_type": "RuntimeError",
        "error_message": "Fatal: RHF reference is only for singlets!"
    });
    let response = fixture.path().join("response.json");
    std::fs::write(&response, serde_json::to_vec(&payload).unwrap()).unwrap();

    let body = format!("cp {} data.json", response.display());
    let binary = write_engine_script(fixture.path(), "1.3.2", &body);

    let scratch_root = TempDir::new().unwrap();
    let harness = harness_for(binary);
    match harness
        .compute(&request(), &config(scratch_root.path()))
        .await
    {
        Err(HarnessError::Input(msg)) => assert!(msg.contains("singlets")),
        other => panic!("expected Input error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unsupported_version_creates_no_scratch() {
    let fixture = TempDir::new().unwrap();
    let binary = write_engine_script(fixture.path(), "1.1", "exit 0");

    let scratch_root = TempDir::new().unwrap();
    let harness = harness_for(binary);
    match harness
        .compute(&request(), &config(scratch_root.path()))
        .await
    {
        Err(HarnessError::UnsupportedVersion(v)) => assert_eq!(v, "1.1"),
        other => panic!("expected UnsupportedVersion, got {other:?}"),
    }

    // Selection failed before the scratch manager ever ran.
    let entries: Vec<_> = std::fs::read_dir(scratch_root.path()).unwrap().collect();
    assert!(entries.is_empty(), "no scratch directory may be created");
}

#[tokio::test]
async fn test_open_shell_request_gets_injected_reference() {
    let fixture = TempDir::new().unwrap();
    let response = fixture.path().join("response.json");
    std::fs::write(&response, serde_json::to_vec(&success_payload()).unwrap()).unwrap();

    // Keep a copy of what the harness staged before overwriting it.
    let staged_copy = fixture.path().join("staged.json");
    let body = format!(
        "cp data.json {}\ncp {} data.json",
        staged_copy.display(),
        response.display()
    );
    let binary = write_engine_script(fixture.path(), "1.3.2", &body);

    let mut req = request();
    req.molecule.molecular_multiplicity = 2;

    let scratch_root = TempDir::new().unwrap();
    let harness = harness_for(binary);
    harness
        .compute(&req, &config(scratch_root.path()))
        .await
        .expect("compute");

    let staged: Value =
        serde_json::from_slice(&std::fs::read(&staged_copy).unwrap()).expect("staged json");
    assert_eq!(staged["keywords"]["reference"], json!("uhf"));
    // The caller's request was never mutated.
    assert!(req.keywords.is_empty());
}
