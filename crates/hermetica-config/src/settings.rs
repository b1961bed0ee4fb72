//! The on-disk configuration schema and its loader.
//!
//! Settings come from a YAML file, layered with `HERMETICA__<SECTION>__<KEY>`
//! environment variables (e.g. `HERMETICA__SCAN__PROFILE=thorough`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use hermetica_types::{HermeticaError, Result, StageName, Target};
use serde::{Deserialize, Serialize};

/// Everything that can be set in `hermetica.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub project: String,
    pub workdir: PathBuf,
    pub targets: Vec<Target>,
    pub tools: ToolSettings,
    pub dns: DnsSettings,
    pub limits: Limits,
    pub scan: ScanSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project: String::new(),
            workdir: PathBuf::from("./work"),
            targets: Vec::new(),
            tools: ToolSettings::default(),
            dns: DnsSettings::default(),
            limits: Limits::default(),
            scan: ScanSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Tool name → executable path.
    pub paths: BTreeMap<String, String>,
    /// Tool name → version requirement (`>=2.6.0`, `^1.3`, `2.3.0`, ...).
    pub versions: BTreeMap<String, String>,
    /// subfinder provider credentials file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<String>,
    /// dnsx resolver list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolvers_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    pub ipv6_enabled: bool,
    /// Passed to `dnsx -retry`.
    pub retries: u32,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            ipv6_enabled: false,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Parsed but not used: targets and stages run sequentially.
    pub concurrency: usize,
    /// Passed to `httpx -retries`.
    pub retries: u32,
    /// Passed to `httpx -timeout`.
    pub httpx_timeout_seconds: u64,
    /// Wall-clock bound for one target's whole stage chain. 0 disables it.
    pub target_timeout_seconds: u64,
    pub stage_timeouts: StageTimeouts,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retries: 2,
            httpx_timeout_seconds: 10,
            target_timeout_seconds: 24 * 60 * 60,
            stage_timeouts: StageTimeouts::default(),
        }
    }
}

impl Limits {
    pub fn target_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.target_timeout_seconds)
    }
}

/// Per-stage bound on a single tool invocation, in seconds. 0 disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub discover_subdomains: u64,
    pub resolve_dns: u64,
    pub scan_ports: u64,
    pub probe_http: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            discover_subdomains: 60 * 60,
            resolve_dns: 60 * 60,
            scan_ports: 24 * 60 * 60,
            probe_http: 24 * 60 * 60,
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: StageName) -> Option<Duration> {
        let secs = match stage {
            StageName::DiscoverSubdomains => self.discover_subdomains,
            StageName::ResolveDns => self.resolve_dns,
            StageName::ScanPorts => self.scan_ports,
            StageName::ProbeHttp => self.probe_http,
        };
        non_zero_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// `thorough` selects a SYN scan; any other value a connect scan.
    pub profile: String,
    /// Passed to `naabu -rate`.
    pub naabu_rate: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            profile: "stealth".into(),
            naabu_rate: 1000,
        }
    }
}

impl ScanSettings {
    pub fn is_thorough(&self) -> bool {
        self.profile == "thorough"
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn config_error(err: config::ConfigError) -> HermeticaError {
    HermeticaError::Configuration(err.to_string())
}

impl Settings {
    /// Load settings from a YAML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(HermeticaError::Configuration(format!(
                "config file {} not found",
                path.display()
            )));
        }
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("HERMETICA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?
            .try_deserialize::<Settings>()
            .map_err(config_error)?;
        tracing::debug!(path = %path.display(), targets = settings.targets.len(), "Loaded configuration");
        Ok(settings)
    }

    /// Parse settings from YAML text without consulting the environment.
    pub fn from_yaml(source: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Yaml))
            .build()
            .map_err(config_error)?
            .try_deserialize::<Settings>()
            .map_err(config_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
project: acme
workdir: /tmp/hermetica
targets:
  - domain: example.com
    include_subdomains: true
    ipv6_enabled: true
  - domain: example.org
tools:
  paths:
    subfinder: /usr/local/bin/subfinder
  versions:
    subfinder: ">=2.6.0"
  provider_config: ~/.config/subfinder/provider-config.yaml
dns:
  retries: 4
limits:
  httpx_timeout_seconds: 7
  stage_timeouts:
    scan_ports: 0
scan:
  profile: thorough
  naabu_rate: 250
"#;

    #[test]
    fn parses_full_document() {
        let s = Settings::from_yaml(SAMPLE).unwrap();
        assert_eq!(s.project, "acme");
        assert_eq!(s.workdir, PathBuf::from("/tmp/hermetica"));
        assert_eq!(s.targets.len(), 2);
        assert!(s.targets[0].ipv6_enabled);
        assert!(!s.targets[1].ipv6_enabled);
        assert_eq!(
            s.tools.paths.get("subfinder").map(String::as_str),
            Some("/usr/local/bin/subfinder")
        );
        assert_eq!(s.dns.retries, 4);
        assert_eq!(s.limits.httpx_timeout_seconds, 7);
        assert!(s.scan.is_thorough());
        assert_eq!(s.scan.naabu_rate, 250);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let s = Settings::from_yaml("project: bare\n").unwrap();
        assert_eq!(s.workdir, PathBuf::from("./work"));
        assert!(s.targets.is_empty());
        assert_eq!(s.dns.retries, 2);
        assert_eq!(s.limits.retries, 2);
        assert_eq!(s.scan.profile, "stealth");
        assert!(!s.scan.is_thorough());
        assert_eq!(
            s.limits.target_timeout(),
            Some(Duration::from_secs(86_400))
        );
    }

    #[test]
    fn zero_stage_timeout_disables_it() {
        let s = Settings::from_yaml(SAMPLE).unwrap();
        assert_eq!(s.limits.stage_timeouts.for_stage(StageName::ScanPorts), None);
        assert_eq!(
            s.limits.stage_timeouts.for_stage(StageName::ResolveDns),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hermetica.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let s = Settings::load(&path).unwrap();
        assert_eq!(s.targets[0].domain, "example.com");
    }

    #[test]
    fn load_missing_file_is_configuration_error() {
        let err = Settings::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, HermeticaError::Configuration(_)));
    }

    #[test]
    fn invalid_yaml_is_configuration_error() {
        let err = Settings::from_yaml("targets: [unclosed").unwrap_err();
        assert!(matches!(err, HermeticaError::Configuration(_)));
    }
}
