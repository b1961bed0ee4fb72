//! Atomic artifact files.
//!
//! Every artifact is written to `<name>.tmp` beside its final path and only
//! renamed into place once it is complete and flushed to disk. A file at the
//! final path is therefore always whole, which is what lets the sequencer use
//! plain existence as its completion signal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hermetica_types::Result;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::executor::LineHandler;

pub const TMP_SUFFIX: &str = ".tmp";

/// The temporary sibling of `path`: `hosts.txt` becomes `hosts.txt.tmp`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Whether the committed artifact at `path` exists. Leftover `.tmp` files do
/// not count.
pub async fn artifact_exists(path: &Path) -> Result<bool> {
    Ok(tokio::fs::try_exists(path).await?)
}

/// A line-oriented artifact under construction.
///
/// Dropping it without calling [`commit`](Self::commit) leaves the final path
/// untouched; the stray `.tmp` file is truncated by the next attempt.
pub struct AtomicArtifact {
    path: PathBuf,
    tmp: PathBuf,
    writer: BufWriter<tokio::fs::File>,
    lines: u64,
}

impl AtomicArtifact {
    /// Open `<path>.tmp` for writing, truncating anything left from an
    /// earlier attempt. The parent directory is created if needed.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(&path);
        let file = tokio::fs::File::create(&tmp).await?;
        Ok(Self {
            path,
            tmp,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    /// Append `line` followed by `\n`.
    pub async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\n").await?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush, fsync, and rename onto the final path.
    pub async fn commit(mut self) -> Result<u64> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        drop(self.writer);
        tokio::fs::rename(&self.tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), lines = self.lines, "Artifact committed");
        Ok(self.lines)
    }

    /// Abandon the artifact and remove its temporary file.
    pub async fn discard(self) {
        drop(self.writer);
        if let Err(e) = tokio::fs::remove_file(&self.tmp).await {
            tracing::debug!(path = %self.tmp.display(), error = %e, "Could not remove temporary artifact");
        }
    }
}

#[async_trait]
impl LineHandler for AtomicArtifact {
    async fn handle_line(&mut self, line: &[u8]) -> Result<()> {
        self.write_line(line).await
    }
}

/// Serialize `value` as pretty JSON and write it to `path` atomically.
pub async fn write_json_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value)?;
    json.push(b'\n');
    let mut artifact = AtomicArtifact::create(path).await?;
    artifact.writer.write_all(&json).await?;
    artifact.commit().await?;
    Ok(())
}
