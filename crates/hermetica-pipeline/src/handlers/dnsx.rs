//! `dnsx`: resolve the discovered hostnames.

use std::path::Path;

use async_trait::async_trait;
use hermetica_config::ToolId;
use hermetica_types::Result;

use super::{path_arg, require_input, run_tool_to_artifact};
use crate::stage::{StageContext, StageHandler, StageReport};

pub struct DnsxHandler;

/// `dnsx -l <list> -a -cname -retry <n> -json [-aaaa] [-r <resolvers>]`
pub fn build_args(
    list: &Path,
    retries: u32,
    ipv6: bool,
    resolvers_file: Option<&Path>,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-l".into(),
        path_arg(list),
        "-a".into(),
        "-cname".into(),
        "-retry".into(),
        retries.to_string(),
        "-json".into(),
    ];
    if ipv6 {
        args.push("-aaaa".into());
    }
    if let Some(resolvers) = resolvers_file {
        args.push("-r".into());
        args.push(path_arg(resolvers));
    }
    args
}

#[async_trait]
impl StageHandler for DnsxHandler {
    fn handler_type(&self) -> &str {
        "dnsx"
    }

    async fn run(
        &self,
        ctx: StageContext<'_>,
        input: Option<&Path>,
        output: &Path,
    ) -> Result<StageReport> {
        let list = require_input(input, output)?;
        let args = build_args(
            list,
            ctx.config.dns.retries,
            ctx.config.ipv6_enabled(ctx.target),
            ctx.config.resolvers_file.as_deref(),
        );
        run_tool_to_artifact(ctx, ToolId::Dnsx, args, Some(list), output).await
    }
}
