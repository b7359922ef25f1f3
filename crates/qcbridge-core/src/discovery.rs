//! Engine discovery collaborator.
//!
//! The harness queries both installation forms of the engine: a
//! subprocess-invocable binary on `PATH` and an importable library module.
//! Production code uses [`SystemDiscovery`]; tests inject fakes.

use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Locates the two installation forms of the engine.
pub trait EngineDiscovery: Send + Sync {
    /// Path of the engine binary on the search path, if installed.
    fn locate(&self, name: &str) -> Option<PathBuf>;

    /// Path of the engine's importable library module, if installed.
    fn locate_importable(&self, name: &str) -> Option<PathBuf>;
}

/// Discovery against the real system: `PATH` lookup for the binary and a
/// Python import probe for the library form.
#[derive(Debug, Default)]
pub struct SystemDiscovery;

impl EngineDiscovery for SystemDiscovery {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn locate_importable(&self, name: &str) -> Option<PathBuf> {
        let probe = format!("import {name}; print({name}.__file__)");
        let output = Command::new("python3").args(["-c", &probe]).output().ok()?;
        if !output.status.success() {
            debug!(module = %name, "import probe failed");
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let path = text.trim();
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}
