//! Synthesis steps: derive a tool's input list from the previous tool's JSONL.
//!
//! All three read their input line by line, skip lines that are not JSON
//! (`malformed_lines`), skip records without the fields they need
//! (`dropped_records`), and write unique values in first-seen order.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Split};

use hermetica_tools::AtomicArtifact;
use hermetica_types::{HermeticaError, Result};

use super::{display_name, require_input};
use crate::stage::{StageContext, StageHandler, StageReport};

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// Streams JSON values out of a JSONL file, counting lines that don't parse.
struct RecordReader {
    segments: Split<BufReader<tokio::fs::File>>,
    malformed: u64,
}

impl RecordReader {
    async fn open(input: &Path, output: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(input)
            .await
            .map_err(|e| HermeticaError::Synthesis {
                artifact: display_name(output),
                message: format!("cannot open {}: {}", input.display(), e),
            })?;
        Ok(Self {
            segments: BufReader::new(file).split(b'\n'),
            malformed: 0,
        })
    }

    async fn next_record(&mut self) -> Result<Option<Value>> {
        while let Some(line) = self.segments.next_segment().await? {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Value>(line) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    self.malformed += 1;
                    tracing::trace!(error = %e, "Skipping malformed line");
                }
            }
        }
        Ok(None)
    }
}

/// An output list that silently ignores values it has already written.
struct UniqueLines {
    artifact: AtomicArtifact,
    seen: HashSet<String>,
}

impl UniqueLines {
    async fn create(output: &Path) -> Result<Self> {
        Ok(Self {
            artifact: AtomicArtifact::create(output).await?,
            seen: HashSet::new(),
        })
    }

    async fn push(&mut self, value: &str) -> Result<()> {
        if self.seen.insert(value.to_string()) {
            self.artifact.write_line(value.as_bytes()).await?;
        }
        Ok(())
    }

    async fn finish(
        self,
        outcome: Result<()>,
        malformed_lines: u64,
        dropped_records: u64,
    ) -> Result<StageReport> {
        match outcome {
            Ok(()) => {
                let lines_written = self.artifact.commit().await?;
                Ok(StageReport {
                    lines_written,
                    malformed_lines,
                    dropped_records,
                })
            }
            Err(e) => {
                self.artifact.discard().await;
                Err(e)
            }
        }
    }
}

fn str_field<'v>(record: &'v Value, key: &str) -> Option<&'v str> {
    record.get(key).and_then(Value::as_str)
}

fn str_list<'v>(record: &'v Value, key: &str) -> impl Iterator<Item = &'v str> {
    record
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// A port as naabu reports it: a number, or occasionally a numeric string.
fn port_field(record: &Value) -> Option<u16> {
    let port = match record.get("port")? {
        Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (port != 0).then_some(port)
}

// ---------------------------------------------------------------------------
// HostListHandler: subdomains.jsonl → subdomains.txt
// ---------------------------------------------------------------------------

pub struct HostListHandler;

#[async_trait]
impl StageHandler for HostListHandler {
    fn handler_type(&self) -> &str {
        "host_list"
    }

    async fn run(
        &self,
        _ctx: StageContext<'_>,
        input: Option<&Path>,
        output: &Path,
    ) -> Result<StageReport> {
        let input = require_input(input, output)?;
        let mut reader = RecordReader::open(input, output).await?;
        let mut hosts = UniqueLines::create(output).await?;
        let mut dropped = 0u64;

        let outcome = async {
            while let Some(record) = reader.next_record().await? {
                match str_field(&record, "host").map(str::trim) {
                    Some(host) if !host.is_empty() => hosts.push(host).await?,
                    _ => dropped += 1,
                }
            }
            Ok::<(), HermeticaError>(())
        }
        .await;

        hosts.finish(outcome, reader.malformed, dropped).await
    }
}

// ---------------------------------------------------------------------------
// IpListHandler: resolved.jsonl → ips.txt
// ---------------------------------------------------------------------------

pub struct IpListHandler;

#[async_trait]
impl StageHandler for IpListHandler {
    fn handler_type(&self) -> &str {
        "ip_list"
    }

    async fn run(
        &self,
        ctx: StageContext<'_>,
        input: Option<&Path>,
        output: &Path,
    ) -> Result<StageReport> {
        let input = require_input(input, output)?;
        let include_ipv6 = ctx.config.ipv6_enabled(ctx.target);
        let mut reader = RecordReader::open(input, output).await?;
        let mut ips = UniqueLines::create(output).await?;
        let mut dropped = 0u64;

        let outcome = async {
            while let Some(record) = reader.next_record().await? {
                let mut found = false;
                for ip in str_list(&record, "a") {
                    ips.push(ip).await?;
                    found = true;
                }
                if include_ipv6 {
                    for ip in str_list(&record, "aaaa") {
                        ips.push(ip).await?;
                        found = true;
                    }
                }
                // CNAME-only or NXDOMAIN answers contribute nothing.
                if !found {
                    dropped += 1;
                }
            }
            Ok::<(), HermeticaError>(())
        }
        .await;

        ips.finish(outcome, reader.malformed, dropped).await
    }
}

// ---------------------------------------------------------------------------
// HostPortHandler: ports.jsonl → targets.txt
// ---------------------------------------------------------------------------

pub struct HostPortHandler;

#[async_trait]
impl StageHandler for HostPortHandler {
    fn handler_type(&self) -> &str {
        "host_port"
    }

    async fn run(
        &self,
        _ctx: StageContext<'_>,
        input: Option<&Path>,
        output: &Path,
    ) -> Result<StageReport> {
        let input = require_input(input, output)?;
        let mut reader = RecordReader::open(input, output).await?;
        let mut targets = UniqueLines::create(output).await?;
        let mut dropped = 0u64;

        let outcome = async {
            while let Some(record) = reader.next_record().await? {
                let ip = str_field(&record, "ip").map(str::trim).filter(|s| !s.is_empty());
                match (ip, port_field(&record)) {
                    (Some(ip), Some(port)) => targets.push(&format!("{}:{}", ip, port)).await?,
                    _ => dropped += 1,
                }
            }
            Ok::<(), HermeticaError>(())
        }
        .await;

        targets.finish(outcome, reader.malformed, dropped).await
    }
}
