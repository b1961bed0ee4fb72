//! Semantic-version parsing and constraint matching for tool pre-flight checks.
//!
//! Tools print their version in free-form banners (`Current Version: v2.6.3`,
//! `naabu 2.3.0`, ...), so [`Version::extract`] scans for the first dotted
//! number rather than requiring an exact format.
//!
//! Constraints use the usual semver range grammar:
//! - comparisons: `=`, `!=`, `>`, `>=`, `<`, `<=`; a bare version is `=`
//! - wildcards: `1.2.x`, `1.*`, `*`; a partial version like `1.2` is `1.2.x`
//! - tilde and caret: `~1.2.3` is `>=1.2.3 <1.3.0`, `^1.2.3` is `>=1.2.3 <2.0.0`
//! - hyphen ranges: `1.2 - 1.4.5`
//! - terms joined by commas or spaces must all hold; `||` separates alternatives

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use hermetica_types::HermeticaError;
use regex::Regex;

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"v?(\d+)\.(\d+)(?:\.(\d+))?").expect("version pattern is valid")
    })
}

/// A `major.minor.patch` version. Missing components are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Find the first version-looking token in `text`.
    pub fn extract(text: &str) -> Option<Version> {
        let caps = version_pattern().captures(text)?;
        let part = |i: usize| -> Option<u64> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };
        Some(Version::new(part(1)?, part(2)?, part(3)?))
    }
}

impl FromStr for Version {
    type Err = HermeticaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        let mut parts = trimmed.split('.');
        let mut next = |required: bool| -> Result<u64, HermeticaError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| {
                    HermeticaError::Configuration(format!("invalid version '{}'", s))
                }),
                None if required => Err(HermeticaError::Configuration(format!(
                    "invalid version '{}'",
                    s
                ))),
                None => Ok(0),
            }
        };
        let version = Version::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(HermeticaError::Configuration(format!(
                "invalid version '{}'",
                s
            )));
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ---------------------------------------------------------------------------
// VersionConstraint
// ---------------------------------------------------------------------------

/// A version with trailing components possibly left open (`1.2`, `1.2.x`, `*`).
#[derive(Debug, Clone, Copy)]
struct Partial {
    parts: [Option<u64>; 3],
}

impl Partial {
    fn parse(text: &str) -> Option<Self> {
        let text = text.strip_prefix('v').unwrap_or(text);
        let mut parts = [None; 3];
        let mut open = false;
        for (i, piece) in text.split('.').enumerate() {
            if i >= 3 {
                return None;
            }
            if matches!(piece, "x" | "X" | "*") {
                open = true;
                continue;
            }
            if open {
                return None;
            }
            parts[i] = Some(piece.parse().ok()?);
        }
        Some(Self { parts })
    }

    fn is_any(&self) -> bool {
        self.parts[0].is_none()
    }

    /// Smallest version the partial covers.
    fn floor(&self) -> Version {
        let [major, minor, patch] = self.parts.map(|p| p.unwrap_or(0));
        Version::new(major, minor, patch)
    }

    /// First version past the partial, `None` for `*`.
    fn ceiling(&self) -> Option<Version> {
        match self.parts {
            [Some(major), Some(minor), Some(patch)] => Some(Version::new(major, minor, patch + 1)),
            [Some(major), Some(minor), None] => Some(Version::new(major, minor + 1, 0)),
            [Some(major), None, _] => Some(Version::new(major + 1, 0, 0)),
            [None, _, _] => None,
        }
    }
}

/// A half-open interval `[min, max)`, optionally negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bound {
    min: Option<Version>,
    max: Option<Version>,
    negated: bool,
}

impl Bound {
    fn range(min: Option<Version>, max: Option<Version>) -> Self {
        Self {
            min,
            max,
            negated: false,
        }
    }

    fn covering(partial: Partial) -> Self {
        if partial.is_any() {
            return Self::range(None, None);
        }
        Self::range(Some(partial.floor()), partial.ceiling())
    }

    fn contains(&self, v: &Version) -> bool {
        let inside = self.min.map_or(true, |min| *v >= min) && self.max.map_or(true, |max| *v < max);
        inside != self.negated
    }
}

const OPERATORS: [&str; 9] = [">=", "<=", "!=", "==", ">", "<", "=", "~", "^"];

/// Parse one term such as `>=1.2`, `~1.4` or `2.x`.
fn parse_term(term: &str) -> Option<Bound> {
    let (op, rest) = OPERATORS
        .iter()
        .find_map(|op| term.strip_prefix(op).map(|rest| (*op, rest)))
        .unwrap_or(("=", term));
    let partial = Partial::parse(rest.trim())?;
    let floor = (!partial.is_any()).then(|| partial.floor());

    let bound = match op {
        "=" | "==" => Bound::covering(partial),
        "!=" => Bound {
            negated: true,
            ..Bound::covering(partial)
        },
        ">=" => Bound::range(floor, None),
        ">" => Bound::range(Some(partial.ceiling()?), None),
        "<" => Bound::range(None, Some(floor?)),
        "<=" => Bound::range(None, partial.ceiling()),
        "~" => {
            let [major, minor, _] = partial.parts;
            let max = match (major, minor) {
                (Some(major), Some(minor)) => Some(Version::new(major, minor + 1, 0)),
                (Some(major), None) => Some(Version::new(major + 1, 0, 0)),
                _ => None,
            };
            Bound::range(floor, max)
        }
        "^" => {
            let max = match partial.parts {
                [None, _, _] => None,
                [Some(major), None, _] => Some(Version::new(major + 1, 0, 0)),
                [Some(0), Some(0), Some(patch)] => Some(Version::new(0, 0, patch + 1)),
                [Some(0), Some(minor), _] => Some(Version::new(0, minor + 1, 0)),
                [Some(major), _, _] => Some(Version::new(major + 1, 0, 0)),
            };
            Bound::range(floor, max)
        }
        _ => return None,
    };
    Some(bound)
}

/// Parse one `||` alternative: terms that must all hold.
fn parse_alternative(text: &str) -> Option<Vec<Bound>> {
    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    let mut bounds = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let mut term = tokens[i].to_string();
        i += 1;
        // `>= 1.2`: operator written apart from its version.
        if OPERATORS.contains(&term.as_str()) {
            term.push_str(tokens.get(i)?);
            i += 1;
        }
        if tokens.get(i) == Some(&"-") {
            let lower = Partial::parse(&term)?;
            let upper = Partial::parse(tokens.get(i + 1)?)?;
            bounds.push(Bound::range(Some(lower.floor()), upper.ceiling()));
            i += 2;
            continue;
        }
        bounds.push(parse_term(&term)?);
    }
    (!bounds.is_empty()).then_some(bounds)
}

/// A parsed version requirement. Displays as the text it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    source: String,
    alternatives: Vec<Vec<Bound>>,
}

impl VersionConstraint {
    pub fn matches(&self, candidate: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|all| all.iter().all(|bound| bound.contains(candidate)))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for VersionConstraint {
    type Err = HermeticaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim();
        let alternatives = source
            .split("||")
            .map(parse_alternative)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                HermeticaError::Configuration(format!("invalid version constraint '{}'", source))
            })?;
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
