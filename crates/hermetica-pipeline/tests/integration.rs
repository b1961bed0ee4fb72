//! End-to-end tests for the Hermetica recon chain.
//!
//! Each test installs shell scripts that stand in for subfinder, dnsx, naabu
//! and httpx, runs the real default step list against them, and inspects the
//! artifacts on disk. Every fake tool appends its name to `calls.log` so
//! tests can tell which tools actually ran.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use hermetica_config::{RunConfig, ToolId, ToolRegistry};
use hermetica_pipeline::{Pipeline, PipelineEvent};
use hermetica_tools::{tmp_path, ProcessExecutor};
use hermetica_types::{HermeticaError, StageName, Target};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SUBFINDER: &str = r#"
printf '{"host":"www.example.com","source":"crtsh"}\n'
printf 'this is not json\n'
printf '{"host":"api.example.com","source":"alienvault"}\n'
printf '{"host":"www.example.com","source":"hackertarget"}\n'
printf '{"source":"anubis"}\n'
"#;

const DNSX: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in -l) list="$2"; shift;; esac
  shift
done
n=0
while read -r h; do
  n=$((n+1))
  printf '{"host":"%s","a":["192.0.2.%d","192.0.2.100"]}\n' "$h" "$n"
done < "$list"
"#;

const NAABU: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in -list) list="$2"; shift;; esac
  shift
done
while read -r ip; do
  printf '{"ip":"%s","port":443}\n' "$ip"
  printf '{"ip":"%s","port":80}\n' "$ip"
done < "$list"
"#;

const HTTPX: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in -list) list="$2"; shift;; esac
  shift
done
while read -r t; do
  printf '{"input":"%s","status_code":200}\n' "$t"
done < "$list"
"#;

struct Harness {
    _root: tempfile::TempDir,
    bin: PathBuf,
    workdir: PathBuf,
    log: PathBuf,
    config: RunConfig,
    target: Target,
}

impl Harness {
    /// Fake tools that behave like a healthy chain.
    fn new() -> Self {
        Self::with_scripts(SUBFINDER, DNSX, NAABU, HTTPX)
    }

    fn with_scripts(subfinder: &str, dnsx: &str, naabu: &str, httpx: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        let workdir = root.path().join("work");
        std::fs::create_dir_all(&bin).unwrap();
        let log = root.path().join("calls.log");

        let mut tools = ToolRegistry::new();
        for (id, body) in [
            (ToolId::Subfinder, subfinder),
            (ToolId::Dnsx, dnsx),
            (ToolId::Naabu, naabu),
            (ToolId::Httpx, httpx),
        ] {
            let path = write_script(&bin, id.as_str(), &log, body);
            tools = tools.with_tool(id, path);
        }

        let config = RunConfig::new(&workdir, tools);
        Self {
            _root: root,
            bin,
            workdir,
            log,
            config,
            target: Target::new("example.com"),
        }
    }

    fn replace_tool(&self, id: ToolId, body: &str) {
        write_script(&self.bin, id.as_str(), &self.log, body);
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::with_default_steps()
            .with_executor(ProcessExecutor::new().with_grace_period(Duration::from_millis(200)))
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.workdir.join("example.com").join(name)
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.artifact(name)).unwrap()
    }

    /// Tool names in invocation order, then clears the log.
    fn take_calls(&self) -> Vec<String> {
        let calls = std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect();
        let _ = std::fs::remove_file(&self.log);
        calls
    }

    fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<(String, Vec<u8>)> =
            std::fs::read_dir(self.workdir.join("example.com"))
                .unwrap()
                .map(|e| e.unwrap().path())
                .map(|p| {
                    let name = p.file_name().unwrap().to_string_lossy().into_owned();
                    (name, std::fs::read(&p).unwrap())
                })
                .collect();
        files.sort();
        files
    }
}

fn write_script(dir: &Path, name: &str, log: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    let script = format!("#!/bin/sh\necho {} >> '{}'\n{}\n", name, log.display(), body);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const ALL_ARTIFACTS: [&str; 8] = [
    "subdomains.jsonl",
    "subdomains.txt",
    "resolved.jsonl",
    "ips.txt",
    "ports.jsonl",
    "targets.txt",
    "web.jsonl",
    "run.meta.json",
];

// ---------------------------------------------------------------------------
// Test 1: Full chain produces every artifact
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_chain_produces_every_artifact() {
    let h = Harness::new();
    let result = h.pipeline().run(&h.config, &h.target, false).await.unwrap();

    assert_eq!(h.take_calls(), vec!["subfinder", "dnsx", "naabu", "httpx"]);
    assert_eq!(result.executed.len(), 7);
    for name in ALL_ARTIFACTS {
        assert!(h.artifact(name).exists(), "{name} missing");
        assert!(!tmp_path(&h.artifact(name)).exists(), "{name}.tmp left behind");
    }

    // Stable first-seen dedupe, malformed and incomplete lines skipped.
    assert_eq!(h.read("subdomains.txt"), "www.example.com\napi.example.com\n");
    assert_eq!(result.malformed_lines, 1);
    assert_eq!(result.dropped_records, 1);

    assert_eq!(h.read("ips.txt"), "192.0.2.1\n192.0.2.100\n192.0.2.2\n");
    assert_eq!(
        h.read("targets.txt"),
        concat!(
            "192.0.2.1:443\n192.0.2.1:80\n",
            "192.0.2.100:443\n192.0.2.100:80\n",
            "192.0.2.2:443\n192.0.2.2:80\n",
        )
    );
    assert_eq!(h.read("web.jsonl").lines().count(), 6);
}

// ---------------------------------------------------------------------------
// Test 2: Second run invokes nothing and changes nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_is_idempotent() {
    let h = Harness::new();
    let pipeline = h.pipeline();
    pipeline.run(&h.config, &h.target, false).await.unwrap();
    h.take_calls();
    let before = h.snapshot();

    let result = pipeline.run(&h.config, &h.target, false).await.unwrap();

    assert!(h.take_calls().is_empty());
    assert!(result.executed.is_empty());
    assert_eq!(result.skipped.len(), 7);
    assert!(!result.meta_written);
    assert_eq!(h.snapshot(), before);
}

// ---------------------------------------------------------------------------
// Test 3: Deleting an intermediate artifact resumes from there
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deleted_intermediate_resumes_downstream() {
    let h = Harness::new();
    let pipeline = h.pipeline();
    pipeline.run(&h.config, &h.target, false).await.unwrap();
    h.take_calls();
    let resolved_before = h.read("resolved.jsonl");

    std::fs::remove_file(h.artifact("ips.txt")).unwrap();
    let result = pipeline.run(&h.config, &h.target, false).await.unwrap();

    assert_eq!(h.take_calls(), vec!["naabu", "httpx"]);
    assert_eq!(
        result.skipped,
        vec!["subdomains.jsonl", "subdomains.txt", "resolved.jsonl"]
    );
    assert_eq!(h.read("resolved.jsonl"), resolved_before);
    assert!(h.artifact("ips.txt").exists());
}

// ---------------------------------------------------------------------------
// Test 4: Force reruns every tool
// ---------------------------------------------------------------------------

#[tokio::test]
async fn force_reruns_every_tool() {
    let h = Harness::new();
    let pipeline = h.pipeline();
    pipeline.run(&h.config, &h.target, false).await.unwrap();
    h.take_calls();

    let result = pipeline.run(&h.config, &h.target, true).await.unwrap();
    assert_eq!(h.take_calls(), vec!["subfinder", "dnsx", "naabu", "httpx"]);
    assert!(result.meta_written);
}

// ---------------------------------------------------------------------------
// Test 5: A failing tool aborts the run and leaves no partial artifact
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_tool_aborts_run() {
    let h = Harness::new();
    h.replace_tool(
        ToolId::Dnsx,
        "printf '{\"host\":\"partial\"}\\n'; echo 'resolver unreachable' >&2; exit 1",
    );

    let err = h.pipeline().run(&h.config, &h.target, false).await.unwrap_err();

    assert_eq!(err.stage(), Some(StageName::ResolveDns));
    match err.root() {
        HermeticaError::ToolFailed { tool, exit_code, .. } => {
            assert_eq!(tool, "dnsx");
            assert_eq!(*exit_code, Some(1));
        }
        other => panic!("Expected ToolFailed, got: {other:?}"),
    }
    assert_eq!(h.take_calls(), vec!["subfinder", "dnsx"]);
    assert!(h.artifact("subdomains.txt").exists());
    assert!(!h.artifact("resolved.jsonl").exists());
    assert!(!tmp_path(&h.artifact("resolved.jsonl")).exists());
    assert!(!h.artifact("ips.txt").exists());
    assert!(!h.artifact("run.meta.json").exists());

    // Once the tool is fixed, the next run picks up at dnsx.
    h.replace_tool(ToolId::Dnsx, DNSX);
    h.pipeline().run(&h.config, &h.target, false).await.unwrap();
    assert_eq!(h.take_calls(), vec!["dnsx", "naabu", "httpx"]);
}

// ---------------------------------------------------------------------------
// Test 6: A stage timeout kills the tool and commits nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stage_timeout_leaves_no_artifact() {
    let mut h = Harness::new();
    h.replace_tool(
        ToolId::Naabu,
        "printf '{\"ip\":\"192.0.2.1\",\"port\":22}\\n'; sleep 30",
    );
    h.config.limits.stage_timeouts.scan_ports = 1;

    let start = std::time::Instant::now();
    let err = h.pipeline().run(&h.config, &h.target, false).await.unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(err.is_timeout(), "got: {err:?}");
    assert_eq!(err.stage(), Some(StageName::ScanPorts));
    assert!(matches!(err.root(), HermeticaError::ToolTimeout { .. }));
    assert!(h.artifact("ips.txt").exists());
    assert!(!h.artifact("ports.jsonl").exists());
    assert!(!h.artifact("targets.txt").exists());
}

// ---------------------------------------------------------------------------
// Test 7: A domain with no subdomains yields empty artifacts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_discovery_yields_empty_artifacts() {
    let h = Harness::with_scripts("true", DNSX, NAABU, HTTPX);
    let result = h.pipeline().run(&h.config, &h.target, false).await.unwrap();

    // Downstream tools are never started on an empty input list.
    assert_eq!(h.take_calls(), vec!["subfinder"]);
    assert_eq!(result.executed.len(), 7);
    for name in ALL_ARTIFACTS {
        assert!(h.artifact(name).exists(), "{name} missing");
    }
    for name in ["subdomains.txt", "resolved.jsonl", "ips.txt", "web.jsonl"] {
        assert_eq!(h.read(name), "", "{name} should be empty");
    }

    // Empty artifacts still count as complete.
    let again = h.pipeline().run(&h.config, &h.target, false).await.unwrap();
    assert!(again.executed.is_empty());
    assert!(h.take_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Test 8: Events report skips and per-step counters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_report_progress() {
    let h = Harness::new();
    let pipeline = h.pipeline();
    let mut rx = pipeline.events().subscribe();

    pipeline.run(&h.config, &h.target, false).await.unwrap();

    let mut completed = Vec::new();
    let mut host_list_counters = None;
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::StepCompleted {
            handler_type,
            malformed_lines,
            dropped_records,
            ..
        } = event
        {
            if handler_type == "host_list" {
                host_list_counters = Some((malformed_lines, dropped_records));
            }
            completed.push(handler_type);
        }
    }
    assert_eq!(
        completed,
        vec!["subfinder", "host_list", "dnsx", "ip_list", "naabu", "host_port", "httpx"]
    );
    assert_eq!(host_list_counters, Some((1, 1)));
}

// ---------------------------------------------------------------------------
// Test 9: Plan reflects what is on disk
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plan_reflects_disk_state() {
    let h = Harness::new();
    let pipeline = h.pipeline();
    pipeline.run(&h.config, &h.target, false).await.unwrap();
    std::fs::remove_file(h.artifact("targets.txt")).unwrap();

    let plan = pipeline.plan(&h.config, &h.target).await.unwrap();
    let incomplete: Vec<_> = plan
        .iter()
        .filter(|s| !s.complete)
        .map(|s| s.handler_type.as_str())
        .collect();
    assert_eq!(incomplete, vec!["host_port"]);
    assert!(plan.iter().all(|s| s.output.starts_with(h.workdir.join("example.com"))));
}

// ---------------------------------------------------------------------------
// Test 10: A target timeout kills the tool's own child processes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn target_timeout_kills_tool_descendants() {
    let mut h = Harness::new();
    let marker = h.log.with_file_name("still_alive");
    h.replace_tool(
        ToolId::Subfinder,
        &format!("(sleep 2; touch '{}') & wait", marker.display()),
    );
    h.config.limits.target_timeout_seconds = 1;

    let err = h.pipeline().run(&h.config, &h.target, false).await.unwrap_err();
    assert!(
        matches!(err, HermeticaError::TargetTimeout { .. }),
        "got: {err:?}"
    );
    assert!(!h.artifact("subdomains.jsonl").exists());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists(), "subfinder's worker outlived the target timeout");
}
