//! Run configuration for the Hermetica pipeline.
//!
//! [`Settings`] is the raw YAML schema. [`RunConfig`] is the immutable value
//! built from it once at startup: CLI overrides applied, tool paths resolved
//! into a typed [`ToolRegistry`], and `~` expanded in file paths. It is passed
//! by reference into the sequencer and every stage handler.

pub mod registry;
pub mod settings;
pub mod version;

use std::path::PathBuf;

use hermetica_types::{HermeticaError, Result, Target};

pub use registry::{find_on_path, ToolDescriptor, ToolId, ToolRegistry};
pub use settings::{DnsSettings, Limits, ScanSettings, Settings, StageTimeouts, ToolSettings};
pub use version::{Version, VersionConstraint};

/// Values supplied on the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub domain: Option<String>,
    pub workdir: Option<PathBuf>,
    pub profile: Option<String>,
}

impl Settings {
    /// Apply command-line overrides.
    ///
    /// A domain override replaces the first target's domain, or adds a target
    /// when none is configured.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(domain) = overrides.domain.as_deref().filter(|d| !d.is_empty()) {
            match self.targets.first_mut() {
                Some(first) => first.domain = domain.to_string(),
                None => self.targets.push(Target::new(domain)),
            }
        }
        if let Some(ref workdir) = overrides.workdir {
            self.workdir = workdir.clone();
        }
        if let Some(profile) = overrides.profile.as_deref().filter(|p| !p.is_empty()) {
            self.scan.profile = profile.to_string();
        }
    }
}

/// The resolved, read-only configuration for one invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub project: String,
    pub workdir: PathBuf,
    pub targets: Vec<Target>,
    pub tools: ToolRegistry,
    pub provider_config: Option<PathBuf>,
    pub resolvers_file: Option<PathBuf>,
    pub dns: DnsSettings,
    pub limits: Limits,
    pub scan: ScanSettings,
}

impl RunConfig {
    /// A configuration with default settings and the given tools.
    pub fn new(workdir: impl Into<PathBuf>, tools: ToolRegistry) -> Self {
        let defaults = Settings::default();
        Self {
            project: defaults.project,
            workdir: workdir.into(),
            targets: defaults.targets,
            tools,
            provider_config: None,
            resolvers_file: None,
            dns: defaults.dns,
            limits: defaults.limits,
            scan: defaults.scan,
        }
    }

    /// Validate settings and resolve every tool executable.
    pub fn resolve(settings: Settings) -> Result<Self> {
        for target in &settings.targets {
            if target.domain.trim().is_empty() {
                return Err(HermeticaError::Configuration(
                    "target with empty domain".into(),
                ));
            }
        }
        let tools = ToolRegistry::resolve(&settings.tools)?;
        Ok(Self {
            project: settings.project,
            workdir: settings.workdir,
            targets: settings.targets,
            tools,
            provider_config: settings.tools.provider_config.as_deref().map(expand_home),
            resolvers_file: settings.tools.resolvers_file.as_deref().map(expand_home),
            dns: settings.dns,
            limits: settings.limits,
            scan: settings.scan,
        })
    }

    /// `<workdir>/<domain>`: where every artifact for `target` lives.
    pub fn target_dir(&self, target: &Target) -> PathBuf {
        self.workdir.join(&target.domain)
    }

    /// IPv6 is used when either the DNS section or the target asks for it.
    pub fn ipv6_enabled(&self, target: &Target) -> bool {
        self.dns.ipv6_enabled || target.ipv6_enabled
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    let Some(rest) = raw.strip_prefix('~') else {
        return PathBuf::from(raw);
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest.trim_start_matches('/')),
        None => PathBuf::from(raw),
    }
}
