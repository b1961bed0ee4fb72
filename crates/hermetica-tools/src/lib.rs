//! Process execution and artifact I/O for Hermetica.
//!
//! Provides the `ProcessExecutor` that runs one external tool with streamed
//! output and a deadline, the `AtomicArtifact` writer that makes every file
//! appear whole or not at all, and the `doctor` pre-flight checks.

pub mod artifact;
pub mod doctor;
pub mod executor;

pub use artifact::{artifact_exists, tmp_path, write_json_atomic, AtomicArtifact, TMP_SUFFIX};
pub use doctor::{
    check_all, check_tool, fix_tool_paths, health_check, save_settings, CheckStatus, ToolCheck,
    HEALTH_CHECKED,
};
pub use executor::{ExecutionSummary, LineCollector, LineHandler, ProcessExecutor, ProcessSpec};
