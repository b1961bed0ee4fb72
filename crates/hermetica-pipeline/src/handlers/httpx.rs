//! `httpx`: probe every open `ip:port` for an HTTP service.

use std::path::Path;

use async_trait::async_trait;
use hermetica_config::{Limits, ToolId};
use hermetica_types::Result;

use super::{path_arg, require_input, run_tool_to_artifact};
use crate::stage::{StageContext, StageHandler, StageReport};

pub struct HttpxHandler;

pub fn build_args(list: &Path, limits: &Limits) -> Vec<String> {
    let mut args: Vec<String> = [
        "-json",
        "-fr",
        "-title",
        "-sc",
        "-tech-detect",
        "-tls-grab",
        "-no-color",
        "-silent",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.extend([
        "-retries".to_string(),
        limits.retries.to_string(),
        "-timeout".to_string(),
        limits.httpx_timeout_seconds.to_string(),
        "-list".to_string(),
        path_arg(list),
    ]);
    args
}

#[async_trait]
impl StageHandler for HttpxHandler {
    fn handler_type(&self) -> &str {
        "httpx"
    }

    async fn run(
        &self,
        ctx: StageContext<'_>,
        input: Option<&Path>,
        output: &Path,
    ) -> Result<StageReport> {
        let list = require_input(input, output)?;
        let args = build_args(list, &ctx.config.limits);
        run_tool_to_artifact(ctx, ToolId::Httpx, args, Some(list), output).await
    }
}
