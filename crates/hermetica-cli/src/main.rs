//! CLI binary for running and checking Hermetica recon pipelines.

use std::path::{Path, PathBuf};

use anyhow::bail;
use clap::{Parser, Subcommand};

use hermetica_config::{Overrides, RunConfig, Settings, ToolRegistry};
use hermetica_pipeline::artifacts::RUN_META_JSON;
use hermetica_pipeline::{load_run_meta, Pipeline};
use hermetica_tools::{CheckStatus, ProcessExecutor};
use hermetica_types::{HermeticaError, Target};

#[derive(Parser)]
#[command(
    name = "hermetica",
    version,
    about = "Resumable recon pipeline over subfinder, dnsx, naabu and httpx"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "configs/hermetica.yaml")]
    config: PathBuf,

    /// Scan this domain instead of the first configured target
    #[arg(short, long, global = true)]
    domain: Option<String>,

    /// Directory that receives one artifact folder per domain
    #[arg(short, long, global = true)]
    workdir: Option<PathBuf>,

    /// Re-run every step even when its artifact exists
    #[arg(long, global = true)]
    force: bool,

    /// Enable debug logging (including tool stderr)
    #[arg(long, global = true)]
    debug: bool,

    /// Scan profile; `thorough` selects a SYN port scan
    #[arg(long, global = true)]
    profile: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for every configured target
    Run,

    /// Show which steps are complete, then continue from the first missing one
    Resume,

    /// Check that every tool is installed and new enough
    Doctor {
        /// Look up missing tool paths on PATH and write them to the config file
        #[arg(long)]
        fix_paths: bool,

        /// Also run the dnsx and httpx `-hc` health checks
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut settings = Settings::load(&cli.config)?;
    settings.apply_overrides(&Overrides {
        domain: cli.domain.clone(),
        workdir: cli.workdir.clone(),
        profile: cli.profile.clone(),
    });

    match cli.command {
        Commands::Run => cmd_run(settings, cli.force).await?,
        Commands::Resume => {
            if cli.force {
                tracing::warn!("--force is ignored by resume");
            }
            cmd_resume(settings).await?;
        }
        Commands::Doctor { fix_paths, dry_run } => {
            cmd_doctor(&cli.config, settings, fix_paths, dry_run).await?
        }
    }

    Ok(())
}

fn load_run_config(settings: Settings) -> anyhow::Result<RunConfig> {
    let config = RunConfig::resolve(settings)?;
    if config.targets.is_empty() {
        return Err(HermeticaError::Configuration(
            "no targets configured; add one to the config file or pass --domain".into(),
        )
        .into());
    }
    Ok(config)
}

async fn cmd_run(settings: Settings, force: bool) -> anyhow::Result<()> {
    let config = load_run_config(settings)?;
    println!("Workdir: {}", config.workdir.display());
    run_targets(&config, force).await
}

async fn cmd_resume(settings: Settings) -> anyhow::Result<()> {
    let config = load_run_config(settings)?;
    let pipeline = Pipeline::with_default_steps();

    for target in &config.targets {
        let plan = pipeline.plan(&config, target).await?;
        println!("{}:", target.domain);
        let meta_path = config.target_dir(target).join(RUN_META_JSON);
        match load_run_meta(&meta_path).await {
            Ok(Some(meta)) => {
                println!("  last run {}", meta.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %meta_path.display(), error = %e, "Unreadable run metadata")
            }
        }
        for step in &plan {
            let mark = if step.complete { "done" } else { "todo" };
            println!(
                "  [{}] {:<20} {:<10} {}",
                mark,
                step.stage.as_str(),
                step.handler_type,
                display_file(&step.output)
            );
        }
        match plan.iter().find(|s| !s.complete) {
            Some(first) => println!("  resuming at {} ({})", first.stage, display_file(&first.output)),
            None => println!("  all steps complete"),
        }
    }

    run_targets(&config, false).await
}

/// Run targets one after another. A failed target does not stop the rest;
/// Ctrl-C stops everything.
async fn run_targets(config: &RunConfig, force: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::with_default_steps();
    let mut failed: Vec<(String, HermeticaError)> = Vec::new();

    for target in &config.targets {
        let outcome = tokio::select! {
            outcome = pipeline.run(config, target, force) => outcome,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(domain = %target.domain, "Interrupted, stopping");
                bail!("interrupted while scanning {}", target.domain);
            }
        };
        match outcome {
            Ok(result) => {
                println!(
                    "{}: {} steps run, {} skipped",
                    target.domain,
                    result.executed.len(),
                    result.skipped.len()
                );
                if result.malformed_lines > 0 || result.dropped_records > 0 {
                    println!(
                        "  skipped {} malformed lines and {} incomplete records",
                        result.malformed_lines, result.dropped_records
                    );
                }
            }
            Err(e) => {
                report_failure(target, &e);
                failed.push((target.domain.clone(), e));
            }
        }
    }

    if !failed.is_empty() {
        let domains: Vec<&str> = failed.iter().map(|(d, _)| d.as_str()).collect();
        bail!(
            "{} of {} targets failed: {}",
            failed.len(),
            config.targets.len(),
            domains.join(", ")
        );
    }
    Ok(())
}

fn report_failure(target: &Target, err: &HermeticaError) {
    let kind = if err.is_timeout() { "timed out" } else { "failed" };
    eprintln!("{}: {}: {}", target.domain, kind, err);
}

async fn cmd_doctor(
    config_path: &Path,
    mut settings: Settings,
    fix_paths: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    if fix_paths {
        // Reloaded so command-line overrides are not written back.
        let mut on_disk = Settings::load(config_path)?;
        let fixed = hermetica_tools::fix_tool_paths(&mut on_disk);
        for (id, path) in &fixed {
            println!("[FIX]  {:<10} {}", id.as_str(), path.display());
        }
        if !fixed.is_empty() {
            hermetica_tools::save_settings(&on_disk, config_path).await?;
            println!("Updated {}", config_path.display());
        }
        settings.tools.paths = on_disk.tools.paths;
    }

    let mut problems = 0usize;
    let (registry, missing) = ToolRegistry::discover(&settings.tools);
    for (id, e) in &missing {
        println!("[FAIL] {:<10} {}", id.as_str(), e);
        problems += 1;
    }
    for check in hermetica_tools::check_all(&registry).await {
        let label = if check.status.is_failure() {
            problems += 1;
            "FAIL"
        } else if matches!(check.status, CheckStatus::Unparsed { .. }) {
            "WARN"
        } else {
            "OK"
        };
        println!("[{}] {:<10} {} ({})", label, check.tool.as_str(), check.status, check.path);
    }

    for (name, path) in [
        ("provider_config", settings.tools.provider_config.as_deref()),
        ("resolvers_file", settings.tools.resolvers_file.as_deref()),
    ] {
        if let Some(raw) = path {
            let expanded = hermetica_config::expand_home(raw);
            if !expanded.is_file() {
                println!("[WARN] {:<10} {} not found", name, expanded.display());
            }
        }
    }

    if dry_run {
        let executor = ProcessExecutor::new();
        for id in hermetica_tools::HEALTH_CHECKED {
            let Ok(descriptor) = registry.get(id) else {
                continue;
            };
            match hermetica_tools::health_check(&executor, descriptor).await {
                Ok(_) => println!("[OK] {:<10} health check passed", id.as_str()),
                Err(e) => println!("[WARN] {:<10} health check failed: {}", id.as_str(), e),
            }
        }
    }

    if problems > 0 {
        bail!("{} tool check(s) failed", problems);
    }
    println!("All tools ready");
    Ok(())
}

fn display_file(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
