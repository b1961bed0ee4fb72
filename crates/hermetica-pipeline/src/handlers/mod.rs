//! Built-in stage handlers.
//!
//! Tool adapters (`subfinder`, `dnsx`, `naabu`, `httpx`) stream a tool's
//! stdout into an atomic artifact. Synthesis handlers reshape one artifact
//! into the next tool's input list.

pub mod dnsx;
pub mod httpx;
pub mod naabu;
pub mod subfinder;
pub mod synthesis;

use std::path::Path;

use hermetica_config::ToolId;
use hermetica_tools::{AtomicArtifact, ProcessSpec};
use hermetica_types::{HermeticaError, Result};

use crate::stage::{StageContext, StageReport};

pub use dnsx::DnsxHandler;
pub use httpx::HttpxHandler;
pub use naabu::NaabuHandler;
pub use subfinder::SubfinderHandler;
pub use synthesis::{HostListHandler, HostPortHandler, IpListHandler};

/// The input artifact a step requires, or a `Synthesis` error naming the
/// output that cannot be built without it.
pub(crate) fn require_input<'p>(input: Option<&'p Path>, output: &Path) -> Result<&'p Path> {
    input.ok_or_else(|| HermeticaError::Synthesis {
        artifact: display_name(output),
        message: "step has no input artifact".into(),
    })
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run `tool` with `args` and stream its stdout into `output`.
///
/// When the step has an input list and that list is empty the tool is not
/// started; an empty artifact is committed instead.
pub(crate) async fn run_tool_to_artifact(
    ctx: StageContext<'_>,
    tool: ToolId,
    args: Vec<String>,
    input: Option<&Path>,
    output: &Path,
) -> Result<StageReport> {
    if let Some(list) = input {
        let meta = tokio::fs::metadata(list)
            .await
            .map_err(|e| HermeticaError::Synthesis {
                artifact: display_name(output),
                message: format!("cannot read {}: {}", list.display(), e),
            })?;
        if meta.len() == 0 {
            tracing::info!(
                stage = %ctx.stage,
                domain = %ctx.target.domain,
                tool = %tool,
                "Input list is empty, writing empty artifact"
            );
            AtomicArtifact::create(output).await?.commit().await?;
            return Ok(StageReport::default());
        }
    }

    let descriptor = ctx.config.tools.get(tool)?;
    let spec = ProcessSpec::new(&descriptor.path)
        .args(args)
        .label(tool.as_str())
        .timeout(ctx.config.limits.stage_timeouts.for_stage(ctx.stage));

    let mut artifact = AtomicArtifact::create(output).await?;
    match ctx.executor.execute(spec, &mut artifact).await {
        Ok(_) => {
            let lines = artifact.commit().await?;
            Ok(StageReport::written(lines))
        }
        Err(e) => {
            artifact.discard().await;
            Err(e)
        }
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
