//! Typed registry of the external tools the pipeline drives.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hermetica_types::{HermeticaError, Result};

use crate::settings::ToolSettings;
use crate::version::VersionConstraint;

// ---------------------------------------------------------------------------
// ToolId
// ---------------------------------------------------------------------------

/// The external tools known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolId {
    Subfinder,
    Dnsx,
    Naabu,
    Httpx,
}

impl ToolId {
    pub const ALL: [ToolId; 4] = [ToolId::Subfinder, ToolId::Dnsx, ToolId::Naabu, ToolId::Httpx];

    /// The conventional binary name, also used as the key in `tools.paths`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::Subfinder => "subfinder",
            ToolId::Dnsx => "dnsx",
            ToolId::Naabu => "naabu",
            ToolId::Httpx => "httpx",
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolId {
    type Err = HermeticaError;

    fn from_str(s: &str) -> Result<Self> {
        ToolId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| HermeticaError::Configuration(format!("unknown tool '{}'", s)))
    }
}

// ---------------------------------------------------------------------------
// ToolDescriptor
// ---------------------------------------------------------------------------

/// A located executable and the version requirement configured for it.
///
/// The requirement is kept as written; it is only parsed by the pre-flight
/// check, so a constraint the checker cannot read never blocks a run.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub id: ToolId,
    pub path: PathBuf,
    pub required_version: Option<String>,
}

impl ToolDescriptor {
    pub fn new(id: ToolId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            required_version: None,
        }
    }

    pub fn with_required_version(mut self, constraint: impl Into<String>) -> Self {
        self.required_version = Some(constraint.into());
        self
    }

    /// The parsed version requirement, if one is configured.
    pub fn version_constraint(&self) -> Result<Option<VersionConstraint>> {
        self.required_version
            .as_deref()
            .map(str::parse::<VersionConstraint>)
            .transpose()
    }

    /// Resolve a tool from its configured path, falling back to a `PATH`
    /// lookup when no path is configured.
    pub fn locate(id: ToolId, configured: Option<&str>, required_version: Option<&str>) -> Result<Self> {
        let required_version = required_version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from);

        let path = match configured.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => {
                let path = PathBuf::from(p);
                if !path.is_file() {
                    return Err(HermeticaError::Configuration(format!(
                        "{} path {} does not exist",
                        id,
                        path.display()
                    )));
                }
                path
            }
            None => find_on_path(id.as_str()).ok_or_else(|| {
                HermeticaError::Configuration(format!(
                    "{} path not set and '{}' not found on PATH",
                    id,
                    id.as_str()
                ))
            })?,
        };

        Ok(Self {
            id,
            path,
            required_version,
        })
    }
}

/// Search the directories in `PATH` for an executable file called `name`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ---------------------------------------------------------------------------
// ToolRegistry
// ---------------------------------------------------------------------------

/// Maps each [`ToolId`] to its resolved [`ToolDescriptor`].
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolId, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every known tool from the `tools` section of the config.
    ///
    /// Fails on the first tool that cannot be located.
    pub fn resolve(settings: &ToolSettings) -> Result<Self> {
        let (registry, mut missing) = Self::discover(settings);
        if missing.is_empty() {
            Ok(registry)
        } else {
            Err(missing.remove(0).1)
        }
    }

    /// Locate every known tool, collecting the ones that cannot be found
    /// instead of stopping at the first.
    pub fn discover(settings: &ToolSettings) -> (Self, Vec<(ToolId, HermeticaError)>) {
        for key in settings.paths.keys().chain(settings.versions.keys()) {
            if key.parse::<ToolId>().is_err() {
                tracing::warn!(tool = %key, "Ignoring configuration for unknown tool");
            }
        }

        let mut registry = Self::new();
        let mut missing = Vec::new();
        for id in ToolId::ALL {
            match ToolDescriptor::locate(
                id,
                settings.paths.get(id.as_str()).map(String::as_str),
                settings.versions.get(id.as_str()).map(String::as_str),
            ) {
                Ok(descriptor) => {
                    tracing::debug!(tool = %id, path = %descriptor.path.display(), "Resolved tool");
                    registry.insert(descriptor);
                }
                Err(e) => missing.push((id, e)),
            }
        }
        (registry, missing)
    }

    pub fn insert(&mut self, descriptor: ToolDescriptor) {
        self.tools.insert(descriptor.id, descriptor);
    }

    /// Builder-style registration of a tool at an explicit path.
    pub fn with_tool(mut self, id: ToolId, path: impl Into<PathBuf>) -> Self {
        self.insert(ToolDescriptor::new(id, path));
        self
    }

    pub fn get(&self, id: ToolId) -> Result<&ToolDescriptor> {
        self.tools
            .get(&id)
            .ok_or_else(|| HermeticaError::Configuration(format!("{} is not configured", id)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    /// Tool name → version requirement as configured, for run metadata.
    pub fn versions(&self) -> BTreeMap<String, String> {
        self.tools
            .values()
            .filter_map(|d| {
                d.required_version
                    .as_ref()
                    .map(|c| (d.id.as_str().to_string(), c.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
