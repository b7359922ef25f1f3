//! Subprocess collaborator: stage inputs, run the engine, collect outputs.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::Result;

/// One output file the engine wrote back, with its framing preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum OutFile {
    Text(String),
    Binary(Vec<u8>),
}

impl OutFile {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OutFile::Text(s) => s.as_bytes(),
            OutFile::Binary(b) => b,
        }
    }
}

/// Captured result of one engine subprocess run. A non-zero exit is data
/// here (`success = false`), never a harness fault; classification happens
/// later.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub outfiles: HashMap<String, OutFile>,
}

/// Stage `inputs` into `workdir`, run `argv` with `workdir` as its current
/// directory, and read back the `outputs` that exist afterwards. Names in
/// `binary_outputs` are read with binary framing, everything else as text.
///
/// The wait is unbounded: the computation itself is the only limit, and
/// cancellation is the caller's responsibility.
pub async fn execute(
    argv: &[String],
    inputs: &[(String, Vec<u8>)],
    outputs: &[&str],
    binary_outputs: &[&str],
    workdir: &Path,
) -> Result<ProcessOutput> {
    for (name, bytes) in inputs {
        tokio::fs::write(workdir.join(name), bytes).await?;
    }

    let Some(program) = argv.first() else {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command").into());
    };

    debug!(cmd = ?argv, workdir = %workdir.display(), "spawning engine");
    let child = Command::new(program)
        .args(&argv[1..])
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let output = child.wait_with_output().await?;
    let success = output.status.success();
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut outfiles = HashMap::new();
    for name in outputs {
        let path = workdir.join(name);
        if !path.is_file() {
            continue;
        }
        let file = if binary_outputs.contains(name) {
            OutFile::Binary(tokio::fs::read(&path).await?)
        } else {
            OutFile::Text(tokio::fs::read_to_string(&path).await?)
        };
        outfiles.insert((*name).to_string(), file);
    }

    debug!(success, outfiles = outfiles.len(), "engine finished");
    Ok(ProcessOutput {
        success,
        stdout,
        stderr,
        outfiles,
    })
}
