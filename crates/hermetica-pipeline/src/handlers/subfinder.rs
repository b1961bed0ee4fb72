//! `subfinder`: passive subdomain enumeration.

use std::path::Path;

use async_trait::async_trait;
use hermetica_config::ToolId;
use hermetica_types::Result;

use super::{path_arg, run_tool_to_artifact};
use crate::stage::{StageContext, StageHandler, StageReport};

/// Writes one JSON record per discovered host to `subdomains.jsonl`.
pub struct SubfinderHandler;

/// `subfinder -silent -all -d <domain> -json [-pc <provider_config>]`
pub fn build_args(domain: &str, provider_config: Option<&Path>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-silent".into(),
        "-all".into(),
        "-d".into(),
        domain.into(),
        "-json".into(),
    ];
    if let Some(pc) = provider_config {
        args.push("-pc".into());
        args.push(path_arg(pc));
    }
    args
}

#[async_trait]
impl StageHandler for SubfinderHandler {
    fn handler_type(&self) -> &str {
        "subfinder"
    }

    async fn run(
        &self,
        ctx: StageContext<'_>,
        _input: Option<&Path>,
        output: &Path,
    ) -> Result<StageReport> {
        let args = build_args(&ctx.target.domain, ctx.config.provider_config.as_deref());
        run_tool_to_artifact(ctx, ToolId::Subfinder, args, None, output).await
    }
}
