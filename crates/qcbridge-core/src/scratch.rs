//! Exclusive scratch directory for one invocation.
//!
//! A [`ScratchScope`] is scoped acquisition, not best-effort cleanup: the
//! directory is newly created with a unique name and removed on every exit
//! path when the scope drops, including classified failures and panics
//! unwinding through the harness.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Engine-specific environment variable consulted when the task config
/// supplies no explicit scratch root.
pub const SCRATCH_ENV: &str = "PSI_SCRATCH";

const SCRATCH_PREFIX: &str = "qcbridge_";
const SCRATCH_SUFFIX: &str = "_psi_scratch";

/// An exclusively-owned working directory, removed on drop.
#[derive(Debug)]
pub struct ScratchScope {
    dir: tempfile::TempDir,
}

impl ScratchScope {
    /// Create a fresh scratch directory under the first root that applies:
    /// the explicit hint, then `$PSI_SCRATCH`, then the platform temp root.
    ///
    /// Concurrent scopes opened with identical hints receive distinct
    /// directories; uniqueness comes from the random infix.
    pub fn open(hint: Option<&Path>) -> Result<Self> {
        let root = hint
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(SCRATCH_ENV).map(PathBuf::from))
            .unwrap_or_else(std::env::temp_dir);

        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(SCRATCH_SUFFIX)
            .tempdir_in(&root)?;
        debug!(scratch = %dir.path().display(), "scratch scope opened");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
