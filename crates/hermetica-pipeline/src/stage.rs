//! Stage handler trait and the ordered step list the sequencer walks.

use std::path::Path;

use async_trait::async_trait;

use hermetica_config::RunConfig;
use hermetica_tools::ProcessExecutor;
use hermetica_types::{Result, StageName, Target};

use crate::artifacts;
use crate::handlers::{
    DnsxHandler, HostListHandler, HostPortHandler, HttpxHandler, IpListHandler, NaabuHandler,
    SubfinderHandler,
};

// ---------------------------------------------------------------------------
// StageContext / StageReport
// ---------------------------------------------------------------------------

/// What a handler can see while it runs one step.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub stage: StageName,
    pub target: &'a Target,
    pub config: &'a RunConfig,
    pub executor: &'a ProcessExecutor,
}

/// Counters produced by one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub lines_written: u64,
    /// Input lines that were not valid JSON.
    pub malformed_lines: u64,
    /// Valid records missing the fields the step needs.
    pub dropped_records: u64,
}

impl StageReport {
    pub fn written(lines_written: u64) -> Self {
        Self {
            lines_written,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// StageHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Short identifier used in logs and events (e.g. "dnsx", "ip_list").
    fn handler_type(&self) -> &str;

    /// Produce `output` from `input`. The output must appear atomically:
    /// either the complete artifact exists at `output` afterwards, or nothing
    /// new does.
    async fn run(
        &self,
        ctx: StageContext<'_>,
        input: Option<&Path>,
        output: &Path,
    ) -> Result<StageReport>;
}

// ---------------------------------------------------------------------------
// PipelineStep
// ---------------------------------------------------------------------------

/// One artifact-producing step. Input and output are file names relative to
/// the target's directory.
pub struct PipelineStep {
    pub stage: StageName,
    pub input: Option<&'static str>,
    pub output: &'static str,
    pub handler: Box<dyn StageHandler>,
}

impl PipelineStep {
    pub fn new(
        stage: StageName,
        input: Option<&'static str>,
        output: &'static str,
        handler: impl StageHandler + 'static,
    ) -> Self {
        Self {
            stage,
            input,
            output,
            handler: Box::new(handler),
        }
    }

    pub fn handler_type(&self) -> &str {
        self.handler.handler_type()
    }
}

impl std::fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStep")
            .field("stage", &self.stage)
            .field("handler", &self.handler_type())
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

/// The recon chain: subfinder → dnsx → naabu → httpx, with the synthesis
/// steps that turn each tool's JSONL into the next tool's input list.
pub fn default_steps() -> Vec<PipelineStep> {
    use artifacts::*;
    vec![
        PipelineStep::new(
            StageName::DiscoverSubdomains,
            None,
            SUBDOMAINS_JSONL,
            SubfinderHandler,
        ),
        PipelineStep::new(
            StageName::ResolveDns,
            Some(SUBDOMAINS_JSONL),
            SUBDOMAINS_TXT,
            HostListHandler,
        ),
        PipelineStep::new(
            StageName::ResolveDns,
            Some(SUBDOMAINS_TXT),
            RESOLVED_JSONL,
            DnsxHandler,
        ),
        PipelineStep::new(StageName::ScanPorts, Some(RESOLVED_JSONL), IPS_TXT, IpListHandler),
        PipelineStep::new(StageName::ScanPorts, Some(IPS_TXT), PORTS_JSONL, NaabuHandler),
        PipelineStep::new(
            StageName::ProbeHttp,
            Some(PORTS_JSONL),
            TARGETS_TXT,
            HostPortHandler,
        ),
        PipelineStep::new(StageName::ProbeHttp, Some(TARGETS_TXT), WEB_JSONL, HttpxHandler),
    ]
}
