//! Shared types and errors for the Hermetica recon pipeline.
//!
//! This crate provides the foundational types used across all other Hermetica crates:
//! - `HermeticaError`: unified error taxonomy
//! - `Target`: the domain a pipeline run is about
//! - `StageName`: the four fixed pipeline stages

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error type for all Hermetica subsystems.
#[derive(Debug, thiserror::Error)]
pub enum HermeticaError {
    // === Configuration ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Tool invocation ===
    #[error("Failed to start '{tool}': {message}")]
    ToolSpawn { tool: String, message: String },

    #[error("'{tool}' exited with {status}")]
    ToolFailed {
        tool: String,
        status: String,
        exit_code: Option<i32>,
    },

    #[error("'{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("Failed to read output of '{tool}': {message}")]
    ToolOutput { tool: String, message: String },

    #[error("Output handler for '{tool}' rejected a line: {message}")]
    LineHandler { tool: String, message: String },

    // === Pipeline ===
    #[error("Cannot build {artifact}: {message}")]
    Synthesis { artifact: String, message: String },

    #[error("Stage '{stage}' failed for {domain}: {source}")]
    Stage {
        stage: StageName,
        domain: String,
        #[source]
        source: Box<HermeticaError>,
    },

    #[error("Pipeline for {domain} timed out after {timeout_ms}ms")]
    TargetTimeout { domain: String, timeout_ms: u64 },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HermeticaError {
    /// Wrap an error with the stage and domain it happened in.
    pub fn in_stage(self, stage: StageName, domain: impl Into<String>) -> Self {
        HermeticaError::Stage {
            stage,
            domain: domain.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any `Stage` wrappers.
    pub fn root(&self) -> &HermeticaError {
        match self {
            HermeticaError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage this error was raised in, if it has been wrapped with one.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            HermeticaError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns `true` when the failure was caused by a deadline, as opposed
    /// to the process failing or a handler rejecting output.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root(),
            HermeticaError::ToolTimeout { .. } | HermeticaError::TargetTimeout { .. }
        )
    }
}

/// A convenience alias for `Result<T, HermeticaError>`.
pub type Result<T> = std::result::Result<T, HermeticaError>;

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// A domain to map, with its scope flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub domain: String,
    #[serde(default)]
    pub include_subdomains: bool,
    #[serde(default)]
    pub ipv6_enabled: bool,
}

impl Target {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            include_subdomains: true,
            ipv6_enabled: false,
        }
    }
}

// ---------------------------------------------------------------------------
// StageName
// ---------------------------------------------------------------------------

/// The fixed stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    DiscoverSubdomains,
    ResolveDns,
    ScanPorts,
    ProbeHttp,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::DiscoverSubdomains,
        StageName::ResolveDns,
        StageName::ScanPorts,
        StageName::ProbeHttp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::DiscoverSubdomains => "discover_subdomains",
            StageName::ResolveDns => "resolve_dns",
            StageName::ScanPorts => "scan_ports",
            StageName::ProbeHttp => "probe_http",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
