//! Pre-flight checks: can each configured tool run, and is it new enough?
//!
//! Also home to the two repair helpers behind `hermetica doctor`: filling in
//! tool paths from `PATH` and writing the settings back, and the `-hc`
//! health checks some tools offer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use hermetica_config::{find_on_path, Settings, ToolDescriptor, ToolId, ToolRegistry, Version};
use hermetica_types::Result;
use tokio::process::Command;

use crate::executor::{ExecutionSummary, LineCollector, ProcessExecutor, ProcessSpec};

const VERSION_TIMEOUT: Duration = Duration::from_secs(15);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Tools that support a `-hc` self-test.
pub const HEALTH_CHECKED: [ToolId; 2] = [ToolId::Dnsx, ToolId::Httpx];

/// Outcome of checking one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    /// Ran, reported a version, and satisfies any constraint.
    Passed { version: Version },
    /// Ran, but printed nothing that looks like a version.
    Unparsed { raw: String },
    /// Ran, but the reported version is too old (or too new).
    Unsatisfied { found: Version, required: String },
    /// Could not be executed at all.
    Failed { message: String },
}

impl CheckStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CheckStatus::Unsatisfied { .. } | CheckStatus::Failed { .. }
        )
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Passed { version } => write!(f, "ok ({})", version),
            CheckStatus::Unparsed { raw } => {
                let first = raw.lines().next().unwrap_or("").trim();
                write!(f, "ok (version unknown: {:?})", first)
            }
            CheckStatus::Unsatisfied { found, required } => {
                write!(f, "found {}, requires {}", found, required)
            }
            CheckStatus::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCheck {
    pub tool: ToolId,
    pub path: String,
    pub status: CheckStatus,
}

/// Run `<tool> -version` (then `--version`) and compare the result with the
/// descriptor's version requirement.
pub async fn check_tool(descriptor: &ToolDescriptor) -> ToolCheck {
    let status = match descriptor.version_constraint() {
        Err(e) => CheckStatus::Failed {
            message: e.to_string(),
        },
        Ok(constraint) => match query_version(descriptor).await {
            Err(message) => CheckStatus::Failed { message },
            Ok(raw) => match Version::extract(&raw) {
                None => CheckStatus::Unparsed { raw },
                Some(found) => match constraint {
                    Some(constraint) if !constraint.matches(&found) => CheckStatus::Unsatisfied {
                        found,
                        required: constraint.to_string(),
                    },
                    _ => CheckStatus::Passed { version: found },
                },
            },
        },
    };
    tracing::debug!(tool = %descriptor.id, status = %status, "Checked tool");
    ToolCheck {
        tool: descriptor.id,
        path: descriptor.path.display().to_string(),
        status,
    }
}

/// Check every tool in the registry, in registry order.
pub async fn check_all(registry: &ToolRegistry) -> Vec<ToolCheck> {
    let mut checks = Vec::with_capacity(registry.len());
    for descriptor in registry.iter() {
        checks.push(check_tool(descriptor).await);
    }
    checks
}

/// Combined stdout and stderr of the first version flag that produces output.
async fn query_version(descriptor: &ToolDescriptor) -> std::result::Result<String, String> {
    let mut last_output = String::from("no output");
    let mut timed_out = None;
    for flag in ["-version", "--version"] {
        let mut cmd = Command::new(&descriptor.path);
        cmd.arg(flag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(VERSION_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => {
                timed_out = Some(format!("'{} {}' timed out", descriptor.id, flag));
                continue;
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if Version::extract(&text).is_some() {
            return Ok(text);
        }
        if !text.trim().is_empty() {
            last_output = text;
        }
    }
    // Nothing version-like from either flag; report what the tool did say.
    match timed_out {
        Some(message) => Err(message),
        None => Ok(last_output),
    }
}

/// Run `<tool> -hc`. Output is discarded; only the exit status matters.
pub async fn health_check(
    executor: &ProcessExecutor,
    descriptor: &ToolDescriptor,
) -> Result<ExecutionSummary> {
    let spec = ProcessSpec::new(&descriptor.path)
        .arg("-hc")
        .label(descriptor.id.as_str())
        .timeout(Some(HEALTH_CHECK_TIMEOUT));
    executor.execute(spec, &mut LineCollector::new()).await
}

/// Point every tool whose configured path is unset or missing at the
/// executable of the same name on `PATH`. Returns the paths that changed.
pub fn fix_tool_paths(settings: &mut Settings) -> Vec<(ToolId, PathBuf)> {
    fill_tool_paths(settings, find_on_path)
}

fn fill_tool_paths(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<PathBuf>,
) -> Vec<(ToolId, PathBuf)> {
    let mut fixed = Vec::new();
    for id in ToolId::ALL {
        let configured = settings
            .tools
            .paths
            .get(id.as_str())
            .map(|p| p.trim())
            .filter(|p| !p.is_empty());
        if configured.is_some_and(|p| Path::new(p).is_file()) {
            continue;
        }
        if let Some(found) = lookup(id.as_str()) {
            tracing::info!(tool = %id, path = %found.display(), "Detected tool path");
            settings
                .tools
                .paths
                .insert(id.as_str().to_string(), found.to_string_lossy().into_owned());
            fixed.push((id, found));
        }
    }
    fixed
}

/// Write `settings` back to `path`. The file is emitted as JSON, which any
/// YAML reader accepts; comments in the original file are not kept.
pub async fn save_settings(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    crate::artifact::write_json_atomic(path, settings).await?;
    tracing::info!(path = %path.display(), "Configuration updated");
    Ok(())
}
