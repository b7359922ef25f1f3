//! Engine version parsing, caching, and resolution.
//!
//! The engine does not emit semver; it emits PEP440-style strings such as
//! `1.3.2` or `1.4a2.dev160`. [`EngineVersion`] gives those a total
//! ordering so protocol thresholds compare semantically, never lexically.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::discovery::EngineDiscovery;
use crate::error::{HarnessError, Result};

/// Name of the engine binary on the search path.
pub const ENGINE_BINARY: &str = "psi4";

/// Name of the engine's importable library module.
pub const ENGINE_MODULE: &str = "psi4";

/// Marker in raw version text that identifies an untagged development
/// build. Such a build is unidentifiable and cannot be protocol-matched.
pub const UNTAGGED_MARKER: &str = "undef";

/// Bounded wait for version/introspection probes. The main compute
/// subprocess is never subject to this.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// A parsed engine version: dotted release segments, an optional
/// pre-release tag (`a2`, `b1`, `rc3`), and an optional dev number.
///
/// Equality follows the ordering, so `1.4` and `1.4.0` compare equal.
#[derive(Debug, Clone)]
pub struct EngineVersion {
    release: Vec<u64>,
    pre: Option<(String, u64)>,
    dev: Option<u64>,
}

impl EngineVersion {
    /// Parse raw version text. Fails with `UnsupportedVersion` when the
    /// text cannot be understood at all.
    pub fn parse(raw: &str) -> Result<Self> {
        let text = raw.trim().trim_start_matches('v').to_lowercase();
        // Local-version suffixes ("+something") do not affect ordering.
        let text = text.split('+').next().unwrap_or("");
        if text.is_empty() {
            return Err(HarnessError::UnsupportedVersion(raw.to_string()));
        }

        let mut release = Vec::new();
        let mut pre = None;
        let mut dev = None;

        for segment in text.split('.') {
            if segment.is_empty() {
                return Err(HarnessError::UnsupportedVersion(raw.to_string()));
            }
            if let Some(rest) = segment.strip_prefix("dev") {
                dev = Some(
                    rest.parse::<u64>()
                        .map_err(|_| HarnessError::UnsupportedVersion(raw.to_string()))?,
                );
                continue;
            }

            let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
            let rest = &segment[digits.len()..];

            if !digits.is_empty() {
                release.push(
                    digits
                        .parse::<u64>()
                        .map_err(|_| HarnessError::UnsupportedVersion(raw.to_string()))?,
                );
            }

            if !rest.is_empty() {
                // Pre-release tag glued to a release segment ("4a2") or
                // standing alone ("rc1").
                let label: String = rest.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
                let number = &rest[label.len()..];
                if label.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
                    return Err(HarnessError::UnsupportedVersion(raw.to_string()));
                }
                let number = if number.is_empty() {
                    0
                } else {
                    number
                        .parse::<u64>()
                        .map_err(|_| HarnessError::UnsupportedVersion(raw.to_string()))?
                };
                pre = Some((label, number));
            }
        }

        if release.is_empty() {
            return Err(HarnessError::UnsupportedVersion(raw.to_string()));
        }

        Ok(Self { release, pre, dev })
    }

    /// Minimum engine release the harness supports.
    pub fn minimum_supported() -> Self {
        Self {
            release: vec![1, 2],
            pre: None,
            dev: None,
        }
    }

    /// First release speaking the modern binary file protocol.
    pub fn modern_threshold() -> Self {
        Self {
            release: vec![1, 4],
            pre: Some(("a".to_string(), 2)),
            dev: Some(160),
        }
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((label, number)) = &self.pre {
            write!(f, "{label}{number}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        Ok(())
    }
}

impl Ord for EngineVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Release segments compare element-wise with zero padding.
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }

        // A pre-release sorts before the final release it precedes.
        let pre_cmp = match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        };
        if pre_cmp != Ordering::Equal {
            return pre_cmp;
        }

        // A dev build sorts before the version it leads up to.
        match (self.dev, other.dev) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl PartialOrd for EngineVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EngineVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EngineVersion {}

/// Process-wide raw-version cache keyed by resolved executable path.
///
/// Write-once per path with idempotent last-writer-wins semantics: a benign
/// race that probes the same binary twice stores the same string twice.
/// Injectable so tests can substitute a fresh cache.
#[derive(Debug, Clone, Default)]
pub struct VersionCache {
    inner: Arc<tokio::sync::Mutex<HashMap<PathBuf, String>>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, binary: &Path) -> Option<String> {
        self.inner.lock().await.get(binary).cloned()
    }

    pub async fn insert(&self, binary: &Path, raw: String) {
        self.inner.lock().await.insert(binary.to_path_buf(), raw);
    }
}

/// A usable engine installation: the binary to invoke and its version.
#[derive(Debug, Clone)]
pub struct ResolvedEngine {
    pub binary: PathBuf,
    pub version: EngineVersion,
    pub raw_version: String,
}

/// Discovers the installed engine and resolves its version, reconciling
/// environment state when only one installation form is present.
pub struct VersionResolver {
    discovery: Arc<dyn EngineDiscovery>,
    cache: VersionCache,
    reconciled: AtomicBool,
}

impl VersionResolver {
    pub fn new(discovery: Arc<dyn EngineDiscovery>, cache: VersionCache) -> Self {
        Self {
            discovery,
            cache,
            reconciled: AtomicBool::new(false),
        }
    }

    /// Resolve the installed engine and its version.
    ///
    /// Fails with `EngineNotFound` when neither installation form exists or
    /// a probe fails/times out, and `UntaggedBuild` when the version text
    /// carries the untagged development marker.
    pub async fn resolve(&self) -> Result<ResolvedEngine> {
        let binary = self.locate_engine().await?;

        let raw_version = match self.cache.get(&binary).await {
            Some(raw) => raw,
            None => {
                let raw = self.probe_version(&binary).await?;
                self.cache.insert(&binary, raw.clone()).await;
                raw
            }
        };

        if raw_version.contains(UNTAGGED_MARKER) {
            return Err(HarnessError::UntaggedBuild(raw_version));
        }

        let version = EngineVersion::parse(&raw_version)?;
        debug!(binary = %binary.display(), version = %version, "engine resolved");
        Ok(ResolvedEngine {
            binary,
            version,
            raw_version,
        })
    }

    async fn locate_engine(&self) -> Result<PathBuf> {
        let binary = self.discovery.locate(ENGINE_BINARY);
        let module = self.discovery.locate_importable(ENGINE_MODULE);

        match (binary, module) {
            (Some(binary), Some(_)) => Ok(binary),
            (Some(binary), None) => {
                if !self.reconciled.swap(true, AtomicOrdering::SeqCst) {
                    self.reconcile_module_path(&binary).await?;
                }
                Ok(binary)
            }
            (None, Some(module)) => self.reconcile_binary_path(&module).await,
            (None, None) => Err(HarnessError::EngineNotFound(format!(
                "no '{ENGINE_BINARY}' binary on PATH and no importable '{ENGINE_MODULE}' module; \
                 install the engine first"
            ))),
        }
    }

    /// Binary-only install: ask the binary where its library module lives
    /// and expose it on `PYTHONPATH` so the embedded path can import it.
    async fn reconcile_module_path(&self, binary: &Path) -> Result<()> {
        let (stdout, stderr) = probe(binary.as_os_str(), &["--module"], &[]).await?;
        if stderr.contains("module does not exist") {
            debug!("engine binary ships without a library module");
            return Ok(());
        }
        if let Some(path) = stdout.split_whitespace().last() {
            append_search_path("PYTHONPATH", Path::new(path))?;
            info!(module_path = %path, "library module path added to PYTHONPATH");
        }
        Ok(())
    }

    /// Library-only install: the module knows which binary it implies; put
    /// that binary's directory on `PATH` and use it downstream.
    async fn reconcile_binary_path(&self, module: &Path) -> Result<PathBuf> {
        let site_root = module
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| {
                HarnessError::EngineNotFound(format!(
                    "module path '{}' has no importable root",
                    module.display()
                ))
            })?
            .to_path_buf();

        let probe_code = format!("import {ENGINE_MODULE}; print({ENGINE_MODULE}.executable)");
        let envs = [("PYTHONPATH".to_string(), site_root.display().to_string())];
        let (stdout, _) = probe("python3".as_ref(), &["-c", &probe_code], &envs).await?;

        let executable = stdout.split_whitespace().last().ok_or_else(|| {
            HarnessError::EngineNotFound(
                "library module did not report an executable path".to_string(),
            )
        })?;
        let executable = PathBuf::from(executable);

        if !self.reconciled.swap(true, AtomicOrdering::SeqCst) {
            if let Some(bin_dir) = executable.parent() {
                append_search_path("PATH", bin_dir)?;
                info!(bin_dir = %bin_dir.display(), "engine binary directory added to PATH");
            }
        }
        Ok(executable)
    }

    async fn probe_version(&self, binary: &Path) -> Result<String> {
        let (stdout, stderr) = probe(binary.as_os_str(), &["--version"], &[]).await?;
        match stdout.split_whitespace().last() {
            Some(token) => Ok(token.to_string()),
            None => {
                warn!(stderr = %stderr, "version probe produced no output");
                Err(HarnessError::EngineNotFound(format!(
                    "'{}' --version produced no output",
                    binary.display()
                )))
            }
        }
    }
}

/// Run a short introspection subprocess under [`PROBE_TIMEOUT`]. A timeout
/// or spawn failure is a fatal resolution failure, not a retryable one.
async fn probe(
    program: &std::ffi::OsStr,
    args: &[&str],
    envs: &[(String, String)],
) -> Result<(String, String)> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let child = cmd.spawn().map_err(|e| {
        HarnessError::EngineNotFound(format!(
            "failed to spawn probe '{}': {e}",
            program.to_string_lossy()
        ))
    })?;

    let output = tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            HarnessError::EngineNotFound(format!(
                "probe '{}' timed out after {}s",
                program.to_string_lossy(),
                PROBE_TIMEOUT.as_secs()
            ))
        })??;

    Ok((
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    ))
}

fn append_search_path(var: &str, dir: &Path) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::env::var_os(var)
        .map(|v| std::env::split_paths(&v).collect())
        .unwrap_or_default();
    if paths.iter().any(|p| p == dir) {
        return Ok(());
    }
    paths.push(dir.to_path_buf());
    let joined = std::env::join_paths(paths)
        .map_err(|e| HarnessError::EngineNotFound(format!("cannot extend {var}: {e}")))?;
    std::env::set_var(var, joined);
    Ok(())
}
