//! Helper process backend.
//!
//! Spawns an external tool (`xprintidle`) for every query and parses the
//! single number it prints.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::BackendError;
use super::IdleBackend;
use super::QueryError;
use super::degraded;

/// Unit of the number a helper prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputUnit {
    /// Milliseconds (xprintidle).
    Millis,
    /// Seconds.
    Seconds,
}

/// Backend that shells out to a helper binary.
#[derive(Debug)]
pub struct HelperBackend {
    name: &'static str,
    program: PathBuf,
    args: Vec<String>,
    unit: OutputUnit,
}

impl HelperBackend {
    /// Registry name of the xprintidle helper.
    pub const XPRINTIDLE: &'static str = "xprintidle";

    /// Resolve `xprintidle` on `PATH`.
    pub fn xprintidle() -> Result<Self, BackendError> {
        let program = which::which("xprintidle")
            .map_err(|e| BackendError::unavailable(Self::XPRINTIDLE, e))?;
        info!("Using xprintidle: {}", program.display());

        Ok(Self::new(
            Self::XPRINTIDLE,
            program,
            Vec::new(),
            OutputUnit::Millis,
        ))
    }

    /// Create a helper backend for an already resolved program.
    pub fn new(
        name: &'static str,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        unit: OutputUnit,
    ) -> Self {
        Self {
            name,
            program: program.into(),
            args,
            unit,
        }
    }

    async fn query(&self) -> Result<f64, QueryError> {
        let program = self.program.display().to_string();
        trace!("Running {} {}", program, self.args.join(" "));

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| QueryError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            debug!(
                "{} stderr: {}",
                program,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(QueryError::ExitStatus {
                program,
                status: output.status,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_output(&stdout, self.unit).ok_or_else(|| QueryError::Malformed {
            program,
            output: stdout.trim().to_string(),
        })
    }
}

#[async_trait]
impl IdleBackend for HelperBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn idle_seconds(&mut self) -> f64 {
        match self.query().await {
            Ok(seconds) => seconds,
            Err(e) => degraded(self.name, &e),
        }
    }
}

/// Parse the first line of helper output into seconds.
fn parse_output(stdout: &str, unit: OutputUnit) -> Option<f64> {
    let line = stdout.lines().next()?.trim();
    let value: f64 = line.parse().ok()?;

    if !value.is_finite() || value < 0.0 {
        return None;
    }

    Some(match unit {
        OutputUnit::Millis => value / 1000.0,
        OutputUnit::Seconds => value,
    })
}
