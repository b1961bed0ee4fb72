//! `naabu`: full-range port scan of the resolved addresses.

use std::path::Path;

use async_trait::async_trait;
use hermetica_config::{ScanSettings, ToolId};
use hermetica_types::Result;

use super::{path_arg, require_input, run_tool_to_artifact};
use crate::stage::{StageContext, StageHandler, StageReport};

pub struct NaabuHandler;

/// `naabu -list <list> -p - -s <s|c> -rate <rate> -json`
///
/// The `thorough` profile selects a SYN scan (`s`); every other profile a
/// connect scan (`c`). The rate is passed through unchanged.
pub fn build_args(list: &Path, scan: &ScanSettings) -> Vec<String> {
    let scan_type = if scan.is_thorough() { "s" } else { "c" };
    vec![
        "-list".into(),
        path_arg(list),
        "-p".into(),
        "-".into(),
        "-s".into(),
        scan_type.into(),
        "-rate".into(),
        scan.naabu_rate.to_string(),
        "-json".into(),
    ]
}

#[async_trait]
impl StageHandler for NaabuHandler {
    fn handler_type(&self) -> &str {
        "naabu"
    }

    async fn run(
        &self,
        ctx: StageContext<'_>,
        input: Option<&Path>,
        output: &Path,
    ) -> Result<StageReport> {
        let list = require_input(input, output)?;
        let args = build_args(list, &ctx.config.scan);
        run_tool_to_artifact(ctx, ToolId::Naabu, args, Some(list), output).await
    }
}
