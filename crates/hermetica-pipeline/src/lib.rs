//! Stage sequencer, tool adapters, and artifact synthesis.
//!
//! This crate implements the Hermetica recon chain: the `StageHandler` trait,
//! the subfinder/dnsx/naabu/httpx adapters and the synthesis steps between
//! them, the skip-or-run sequencer, progress events, and run metadata.

pub mod artifacts;
pub mod engine;
pub mod events;
pub mod handlers;
pub mod meta;
pub mod stage;

pub use engine::{Pipeline, PipelineResult, StepStatus};
pub use events::{EventEmitter, PipelineEvent};
pub use handlers::{
    DnsxHandler, HostListHandler, HostPortHandler, HttpxHandler, IpListHandler, NaabuHandler,
    SubfinderHandler,
};
pub use meta::{load_run_meta, save_run_meta, RunMeta};
pub use stage::{default_steps, PipelineStep, StageContext, StageHandler, StageReport};
