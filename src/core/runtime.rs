//! Interpreter version pin verification

use regex::Regex;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

use super::workflow::RuntimeConfig;
use crate::util::log_cmd;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Interpreter '{0}' not found on PATH")]
    NotFound(String),

    #[error("Failed to run '{interpreter} --version': {reason}")]
    Probe { interpreter: String, reason: String },

    #[error("Could not read a version from '{0}'")]
    Unparseable(String),

    #[error("Runtime version mismatch: {interpreter} is {found}, workflow pins {required}")]
    Mismatch {
        interpreter: String,
        required: String,
        found: String,
    },
}

/// A located interpreter whose version satisfies the pin
#[derive(Debug, Clone)]
pub struct VerifiedRuntime {
    pub path: PathBuf,
    pub version: String,
}

/// Locate the interpreter and check its reported version against the pin.
pub fn verify_runtime(config: &RuntimeConfig) -> Result<VerifiedRuntime, RuntimeError> {
    let path = which::which(&config.interpreter)
        .map_err(|_| RuntimeError::NotFound(config.interpreter.clone()))?;

    let mut cmd = Command::new(&path);
    cmd.arg("--version");
    log_cmd(&cmd);
    let output = cmd.output().map_err(|e| RuntimeError::Probe {
        interpreter: config.interpreter.clone(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(RuntimeError::Probe {
            interpreter: config.interpreter.clone(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    // Python 2 printed its version on stderr
    let reported = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let version = parse_version(&reported)
        .ok_or_else(|| RuntimeError::Unparseable(reported.trim().to_string()))?;

    if !version_satisfies(&version, &config.version) {
        return Err(RuntimeError::Mismatch {
            interpreter: config.interpreter.clone(),
            required: config.version.clone(),
            found: version,
        });
    }

    tracing::debug!(path = %path.display(), %version, "Runtime verified");
    Ok(VerifiedRuntime { path, version })
}

/// First dotted version number in `--version` output.
pub fn parse_version(output: &str) -> Option<String> {
    let re = Regex::new(r"\d+(?:\.\d+)+").ok()?;
    re.find(output).map(|m| m.as_str().to_string())
}

/// `found` equals `required`, or extends it at a component boundary.
pub fn version_satisfies(found: &str, required: &str) -> bool {
    let required = required.trim();
    match found.strip_prefix(required) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
