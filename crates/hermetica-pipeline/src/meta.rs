//! `run.meta.json`: a small record of when and how a target was last run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hermetica_config::RunConfig;
use hermetica_types::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub generated_at: DateTime<Utc>,
    pub workdir: PathBuf,
    /// Tool name → version requirement, exactly as configured.
    pub tool_versions: BTreeMap<String, String>,
}

impl RunMeta {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            generated_at: Utc::now(),
            workdir: config.workdir.clone(),
            tool_versions: config.tools.versions(),
        }
    }
}

pub async fn save_run_meta(meta: &RunMeta, path: &Path) -> Result<()> {
    hermetica_tools::write_json_atomic(path, meta).await?;
    tracing::debug!(path = %path.display(), "Run metadata saved");
    Ok(())
}

/// Returns `Ok(None)` when the file does not exist.
pub async fn load_run_meta(path: &Path) -> Result<Option<RunMeta>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(path).await?;
    Ok(Some(serde_json::from_str(&json)?))
}
