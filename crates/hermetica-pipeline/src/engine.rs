//! The stage sequencer.
//!
//! For one target, walks the ordered step list. A step is skipped when its
//! output artifact already exists and the run is not forced; once any step
//! actually executes, every later step is forced too, so a deleted
//! intermediate artifact rebuilds everything downstream of it. The first
//! failing step aborts the target.

use std::path::PathBuf;
use std::time::Instant;

use hermetica_config::RunConfig;
use hermetica_tools::{artifact_exists, ProcessExecutor};
use hermetica_types::{HermeticaError, Result, StageName, Target};

use crate::artifacts::RUN_META_JSON;
use crate::events::{EventEmitter, PipelineEvent};
use crate::meta::{save_run_meta, RunMeta};
use crate::stage::{default_steps, PipelineStep, StageContext, StageReport};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Drives the step list for one target at a time.
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    executor: ProcessExecutor,
    events: EventEmitter,
}

/// What a completed run did.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// `<workdir>/<domain>`.
    pub target_dir: PathBuf,
    /// Output artifact names of the steps that ran, in order.
    pub executed: Vec<String>,
    /// Output artifact names of the steps that were skipped.
    pub skipped: Vec<String>,
    pub malformed_lines: u64,
    pub dropped_records: u64,
    pub meta_written: bool,
    pub duration_ms: u64,
}

/// Completion state of one step, as reported by [`Pipeline::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub stage: StageName,
    pub handler_type: String,
    pub output: PathBuf,
    pub complete: bool,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

impl Pipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self {
            steps,
            executor: ProcessExecutor::new(),
            events: EventEmitter::default(),
        }
    }

    /// The subfinder → dnsx → naabu → httpx chain.
    pub fn with_default_steps() -> Self {
        Self::new(default_steps())
    }

    pub fn with_executor(mut self, executor: ProcessExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Run every step for `target`, bounded by the target timeout.
    ///
    /// When the timeout fires the in-flight step's future is dropped, which
    /// kills its subprocess and everything that subprocess started; already
    /// committed artifacts are kept.
    pub async fn run(
        &self,
        config: &RunConfig,
        target: &Target,
        force: bool,
    ) -> Result<PipelineResult> {
        let Some(limit) = config.limits.target_timeout() else {
            return self.run_steps(config, target, force).await;
        };
        match tokio::time::timeout(limit, self.run_steps(config, target, force)).await {
            Ok(result) => result,
            Err(_) => {
                let err = HermeticaError::TargetTimeout {
                    domain: target.domain.clone(),
                    timeout_ms: limit.as_millis() as u64,
                };
                tracing::error!(domain = %target.domain, error = %err, "Pipeline timed out");
                self.events.emit(PipelineEvent::PipelineFailed {
                    domain: target.domain.clone(),
                    stage: None,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        config: &RunConfig,
        target: &Target,
        force: bool,
    ) -> Result<PipelineResult> {
        let start = Instant::now();
        let target_dir = config.target_dir(target);
        tokio::fs::create_dir_all(&target_dir).await?;

        tracing::info!(
            domain = %target.domain,
            workdir = %target_dir.display(),
            force,
            "Pipeline started"
        );
        self.events.emit(PipelineEvent::PipelineStarted {
            domain: target.domain.clone(),
            step_count: self.steps.len(),
        });

        let mut result = PipelineResult {
            target_dir: target_dir.clone(),
            ..Default::default()
        };
        let mut forced = force;

        for step in &self.steps {
            let output = target_dir.join(step.output);
            let input = step.input.map(|name| target_dir.join(name));
            let handler_type = step.handler_type().to_string();

            let exists = artifact_exists(&output)
                .await
                .map_err(|e| e.in_stage(step.stage, &target.domain))?;
            if exists && !forced {
                tracing::info!(
                    stage = %step.stage,
                    domain = %target.domain,
                    handler = %handler_type,
                    artifact = step.output,
                    "Skipping step, artifact exists"
                );
                self.events.emit(PipelineEvent::StepSkipped {
                    stage: step.stage,
                    handler_type,
                    output: step.output.to_string(),
                });
                result.skipped.push(step.output.to_string());
                continue;
            }

            tracing::info!(
                stage = %step.stage,
                domain = %target.domain,
                handler = %handler_type,
                artifact = step.output,
                "Running step"
            );
            self.events.emit(PipelineEvent::StepStarted {
                stage: step.stage,
                handler_type: handler_type.clone(),
                output: step.output.to_string(),
            });

            let ctx = StageContext {
                stage: step.stage,
                target,
                config,
                executor: &self.executor,
            };
            let step_start = Instant::now();
            let report = match step.handler.run(ctx, input.as_deref(), &output).await {
                Ok(report) => report,
                Err(e) => {
                    let err = e.in_stage(step.stage, &target.domain);
                    tracing::error!(
                        stage = %step.stage,
                        domain = %target.domain,
                        handler = %handler_type,
                        error = %err,
                        "Step failed"
                    );
                    self.events.emit(PipelineEvent::StepFailed {
                        stage: step.stage,
                        handler_type,
                        error: err.to_string(),
                    });
                    self.events.emit(PipelineEvent::PipelineFailed {
                        domain: target.domain.clone(),
                        stage: Some(step.stage),
                        error: err.to_string(),
                    });
                    return Err(err);
                }
            };

            self.record_step(step, &handler_type, &report, step_start, &target.domain);
            result.malformed_lines += report.malformed_lines;
            result.dropped_records += report.dropped_records;
            result.executed.push(step.output.to_string());
            // Everything downstream of fresh output is stale.
            forced = true;
        }

        result.meta_written = self.write_meta(config, target, &result).await;
        result.duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            domain = %target.domain,
            executed = result.executed.len(),
            skipped = result.skipped.len(),
            malformed_lines = result.malformed_lines,
            dropped_records = result.dropped_records,
            duration_ms = result.duration_ms,
            "Pipeline completed"
        );
        self.events.emit(PipelineEvent::PipelineCompleted {
            domain: target.domain.clone(),
            executed: result.executed.len(),
            skipped: result.skipped.len(),
            duration_ms: result.duration_ms,
        });
        Ok(result)
    }

    fn record_step(
        &self,
        step: &PipelineStep,
        handler_type: &str,
        report: &StageReport,
        started: Instant,
        domain: &str,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        if report.malformed_lines > 0 || report.dropped_records > 0 {
            tracing::warn!(
                stage = %step.stage,
                domain = %domain,
                handler = %handler_type,
                malformed_lines = report.malformed_lines,
                dropped_records = report.dropped_records,
                "Skipped unusable input records"
            );
        }
        tracing::info!(
            stage = %step.stage,
            domain = %domain,
            handler = %handler_type,
            lines = report.lines_written,
            duration_ms,
            "Step completed"
        );
        self.events.emit(PipelineEvent::StepCompleted {
            stage: step.stage,
            handler_type: handler_type.to_string(),
            lines_written: report.lines_written,
            malformed_lines: report.malformed_lines,
            dropped_records: report.dropped_records,
            duration_ms,
        });
    }

    /// Write `run.meta.json` unless nothing ran and it already exists.
    /// Failures are logged, never returned.
    async fn write_meta(&self, config: &RunConfig, target: &Target, result: &PipelineResult) -> bool {
        let path = result.target_dir.join(RUN_META_JSON);
        if result.executed.is_empty() && artifact_exists(&path).await.unwrap_or(false) {
            return false;
        }
        match save_run_meta(&RunMeta::new(config), &path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    domain = %target.domain,
                    path = %path.display(),
                    error = %e,
                    "Failed to write run metadata"
                );
                false
            }
        }
    }

    /// Completion state of every step for `target`, without running anything.
    pub async fn plan(&self, config: &RunConfig, target: &Target) -> Result<Vec<StepStatus>> {
        let target_dir = config.target_dir(target);
        let mut statuses = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let output = target_dir.join(step.output);
            let complete = artifact_exists(&output).await?;
            statuses.push(StepStatus {
                stage: step.stage,
                handler_type: step.handler_type().to_string(),
                output,
                complete,
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use hermetica_config::ToolRegistry;
    use hermetica_tools::AtomicArtifact;

    use crate::stage::StageHandler;

    /// Writes a single line and counts its invocations.
    struct Touch {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StageHandler for Touch {
        fn handler_type(&self) -> &str {
            self.name
        }

        async fn run(
            &self,
            _ctx: StageContext<'_>,
            _input: Option<&Path>,
            output: &Path,
        ) -> Result<StageReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut artifact = AtomicArtifact::create(output).await?;
            artifact.write_line(self.name.as_bytes()).await?;
            Ok(StageReport::written(artifact.commit().await?))
        }
    }

    struct Fail;

    #[async_trait]
    impl StageHandler for Fail {
        fn handler_type(&self) -> &str {
            "fail"
        }

        async fn run(
            &self,
            _ctx: StageContext<'_>,
            _input: Option<&Path>,
            _output: &Path,
        ) -> Result<StageReport> {
            Err(HermeticaError::ToolFailed {
                tool: "fake".into(),
                status: "exit code 1".into(),
                exit_code: Some(1),
            })
        }
    }

    fn three_steps(calls: &[Arc<AtomicUsize>; 3]) -> Pipeline {
        Pipeline::new(vec![
            PipelineStep::new(
                StageName::DiscoverSubdomains,
                None,
                "one.txt",
                Touch {
                    name: "one",
                    calls: calls[0].clone(),
                },
            ),
            PipelineStep::new(
                StageName::ResolveDns,
                Some("one.txt"),
                "two.txt",
                Touch {
                    name: "two",
                    calls: calls[1].clone(),
                },
            ),
            PipelineStep::new(
                StageName::ScanPorts,
                Some("two.txt"),
                "three.txt",
                Touch {
                    name: "three",
                    calls: calls[2].clone(),
                },
            ),
        ])
    }

    fn counters() -> [Arc<AtomicUsize>; 3] {
        std::array::from_fn(|_| Arc::new(AtomicUsize::new(0)))
    }

    fn counts(calls: &[Arc<AtomicUsize>; 3]) -> [usize; 3] {
        std::array::from_fn(|i| calls[i].load(Ordering::SeqCst))
    }

    // -----------------------------------------------------------------------
    // Test 1: second run skips everything
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn second_run_skips_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(dir.path(), ToolRegistry::new());
        let target = Target::new("example.com");
        let calls = counters();
        let pipeline = three_steps(&calls);

        let first = pipeline.run(&config, &target, false).await.unwrap();
        assert_eq!(first.executed, vec!["one.txt", "two.txt", "three.txt"]);
        assert!(first.meta_written);

        let second = pipeline.run(&config, &target, false).await.unwrap();
        assert!(second.executed.is_empty());
        assert_eq!(second.skipped.len(), 3);
        assert!(!second.meta_written);
        assert_eq!(counts(&calls), [1, 1, 1]);
    }

    // -----------------------------------------------------------------------
    // Test 2: force reruns everything
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn force_reruns_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(dir.path(), ToolRegistry::new());
        let target = Target::new("example.com");
        let calls = counters();
        let pipeline = three_steps(&calls);

        pipeline.run(&config, &target, false).await.unwrap();
        pipeline.run(&config, &target, true).await.unwrap();
        assert_eq!(counts(&calls), [2, 2, 2]);
    }

    // -----------------------------------------------------------------------
    // Test 3: a missing intermediate reruns it and everything after it
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn missing_intermediate_reruns_downstream_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(dir.path(), ToolRegistry::new());
        let target = Target::new("example.com");
        let calls = counters();
        let pipeline = three_steps(&calls);

        pipeline.run(&config, &target, false).await.unwrap();
        std::fs::remove_file(dir.path().join("example.com/two.txt")).unwrap();

        let result = pipeline.run(&config, &target, false).await.unwrap();
        assert_eq!(result.skipped, vec!["one.txt"]);
        assert_eq!(result.executed, vec!["two.txt", "three.txt"]);
        assert_eq!(counts(&calls), [1, 2, 2]);
    }

    // -----------------------------------------------------------------------
    // Test 4: failure aborts and is wrapped with stage and domain
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failure_aborts_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(dir.path(), ToolRegistry::new());
        let target = Target::new("example.com");
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![
            PipelineStep::new(StageName::DiscoverSubdomains, None, "one.txt", Fail),
            PipelineStep::new(
                StageName::ResolveDns,
                Some("one.txt"),
                "two.txt",
                Touch {
                    name: "two",
                    calls: calls.clone(),
                },
            ),
        ]);
        let mut rx = pipeline.events().subscribe();

        let err = pipeline.run(&config, &target, false).await.unwrap_err();
        assert_eq!(err.stage(), Some(StageName::DiscoverSubdomains));
        assert!(matches!(err.root(), HermeticaError::ToolFailed { .. }));
        assert!(err.to_string().contains("example.com"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("example.com/run.meta.json").exists());

        let mut saw_step_failed = false;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StepFailed { stage, .. } = event {
                assert_eq!(stage, StageName::DiscoverSubdomains);
                saw_step_failed = true;
            }
        }
        assert!(saw_step_failed);
    }

    // -----------------------------------------------------------------------
    // Test 5: plan reports completion without running anything
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn plan_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(dir.path(), ToolRegistry::new());
        let target = Target::new("example.com");
        let calls = counters();
        let pipeline = three_steps(&calls);

        let before = pipeline.plan(&config, &target).await.unwrap();
        assert!(before.iter().all(|s| !s.complete));

        pipeline.run(&config, &target, false).await.unwrap();
        std::fs::remove_file(dir.path().join("example.com/three.txt")).unwrap();

        let after = pipeline.plan(&config, &target).await.unwrap();
        let complete: Vec<bool> = after.iter().map(|s| s.complete).collect();
        assert_eq!(complete, vec![true, true, false]);
        assert_eq!(after[2].handler_type, "three");
        assert_eq!(counts(&calls), [1, 1, 1]);
    }

    // -----------------------------------------------------------------------
    // Test 6: target timeout cancels the in-flight step
    // -----------------------------------------------------------------------

    struct Hang;

    #[async_trait]
    impl StageHandler for Hang {
        fn handler_type(&self) -> &str {
            "hang"
        }

        async fn run(
            &self,
            _ctx: StageContext<'_>,
            _input: Option<&Path>,
            _output: &Path,
        ) -> Result<StageReport> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(StageReport::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn target_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunConfig::new(dir.path(), ToolRegistry::new());
        config.limits.target_timeout_seconds = 5;
        let target = Target::new("example.com");
        let pipeline = Pipeline::new(vec![PipelineStep::new(
            StageName::ProbeHttp,
            None,
            "web.jsonl",
            Hang,
        )]);

        let err = pipeline.run(&config, &target, false).await.unwrap_err();
        assert!(
            matches!(err, HermeticaError::TargetTimeout { timeout_ms: 5000, .. }),
            "got: {err:?}"
        );
        assert!(err.is_timeout());
    }
}
