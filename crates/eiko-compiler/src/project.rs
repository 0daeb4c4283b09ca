//! Project configuration (`eiko.toml`).

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;

/// Version of this implementation, checked against `[eiko] version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default, Deserialize)]
struct RawToml {
    #[serde(default)]
    eiko: RawEiko,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawEiko {
    /// Required minimum engine version, e.g. `">=0.1.0"`.
    version: Option<String>,
    #[serde(default)]
    project: Option<RawProject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawProject {
    entry_point: Option<String>,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    requires: Vec<String>,
    ssh_timeout: Option<u64>,
}

/// Settings read from an `eiko.toml`, with defaults when absent.
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    pub exists: bool,
    pub entry_point: Option<String>,
    pub version_requirement: Option<String>,
    pub dry_run: bool,
    pub requires: Vec<PackageSpec>,
    /// Timeout, in seconds, for remote command execution.
    pub ssh_timeout: u64,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            exists: false,
            entry_point: None,
            version_requirement: None,
            dry_run: false,
            requires: Vec::new(),
            ssh_timeout: 3,
        }
    }
}

impl ProjectSettings {
    /// Read `eiko.toml` from a directory; a missing file yields defaults.
    pub fn read(dir: &Path) -> Result<ProjectSettings, Error> {
        let path = dir.join("eiko.toml");
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Ok(ProjectSettings::default());
        };
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<ProjectSettings, Error> {
        let raw: RawToml = toml::from_str(text).map_err(|e| Error::Internal {
            message: format!("failed to parse eiko.toml: {e}"),
        })?;
        let project = raw.eiko.project.unwrap_or_default();
        let mut requires = Vec::new();
        for spec in &project.requires {
            requires.push(spec.parse().map_err(|e: String| Error::Internal {
                message: format!("bad package spec in eiko.toml: {e}"),
            })?);
        }
        let settings = ProjectSettings {
            exists: true,
            entry_point: project.entry_point,
            version_requirement: raw.eiko.version,
            dry_run: project.dry_run,
            requires,
            ssh_timeout: project.ssh_timeout.unwrap_or(3),
        };
        settings.check_version()?;
        Ok(settings)
    }

    /// Validate the engine version against `[eiko] version`.
    fn check_version(&self) -> Result<(), Error> {
        let Some(requirement) = &self.version_requirement else {
            return Ok(());
        };
        for clause in requirement.split(',') {
            let clause = clause.trim();
            if !version_clause_matches(clause, VERSION).map_err(|e| Error::Internal {
                message: format!("bad version requirement '{clause}': {e}"),
            })? {
                return Err(Error::ImportVersionMismatch {
                    package: "project".to_string(),
                    required: requirement.clone(),
                    actual: VERSION.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn version_clause_matches(clause: &str, actual: &str) -> Result<bool, String> {
    let (op, rest) = if let Some(rest) = clause.strip_prefix(">=") {
        (">=", rest)
    } else if let Some(rest) = clause.strip_prefix("<=") {
        ("<=", rest)
    } else if let Some(rest) = clause.strip_prefix("==") {
        ("==", rest)
    } else if let Some(rest) = clause.strip_prefix("!=") {
        ("!=", rest)
    } else if let Some(rest) = clause.strip_prefix('>') {
        (">", rest)
    } else if let Some(rest) = clause.strip_prefix('<') {
        ("<", rest)
    } else {
        return Err("missing comparison operator".to_string());
    };
    let wanted = parse_version(rest.trim())?;
    let actual = parse_version(actual)?;
    Ok(match op {
        ">=" => actual >= wanted,
        "<=" => actual <= wanted,
        "==" => actual == wanted,
        "!=" => actual != wanted,
        ">" => actual > wanted,
        "<" => actual < wanted,
        _ => unreachable!(),
    })
}

fn parse_version(text: &str) -> Result<(u64, u64, u64), String> {
    let mut parts = text.split('.');
    let mut next = |name: &str| -> Result<u64, String> {
        match parts.next() {
            Some(p) => p
                .parse()
                .map_err(|_| format!("invalid {name} component in '{text}'")),
            None => Ok(0),
        }
    };
    Ok((next("major")?, next("minor")?, next("patch")?))
}

/// A package requirement from `[eiko.project] requires`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSpec {
    /// `GH://owner/name`
    GitHub { owner: String, name: String },
    /// `name@version`
    Registry { name: String, version: String },
    /// Bare `name` (latest).
    Name(String),
}

impl FromStr for PackageSpec {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = spec.strip_prefix("GH://") {
            let mut parts = rest.splitn(2, '/');
            let owner = parts.next().unwrap_or_default();
            let name = parts.next().unwrap_or_default();
            if owner.is_empty() || name.is_empty() {
                return Err(format!("'{spec}' is not of the form GH://owner/name"));
            }
            return Ok(PackageSpec::GitHub {
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }
        if let Some((name, version)) = spec.split_once('@') {
            if name.is_empty() || version.is_empty() {
                return Err(format!("'{spec}' is not of the form name@version"));
            }
            return Ok(PackageSpec::Registry {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        if spec.is_empty() {
            return Err("empty package spec".to_string());
        }
        Ok(PackageSpec::Name(spec.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = ProjectSettings::read(Path::new("/definitely/not/here")).unwrap();
        assert!(!settings.exists);
        assert_eq!(settings.ssh_timeout, 3);
        assert!(!settings.dry_run);
    }

    #[test]
    fn parses_full_project_section() {
        let toml = r#"
            [eiko]
            version = ">=0.1.0"

            [eiko.project]
            entry_point = "main.eiko"
            dry_run = true
            requires = ["GH://eikobot/std", "nginx@1.2.3"]
            ssh_timeout = 10
        "#;
        let settings = ProjectSettings::parse(toml).unwrap();
        assert!(settings.exists);
        assert!(settings.dry_run);
        assert_eq!(settings.ssh_timeout, 10);
        assert_eq!(settings.entry_point.as_deref(), Some("main.eiko"));
        assert_eq!(
            settings.requires,
            vec![
                PackageSpec::GitHub {
                    owner: "eikobot".to_string(),
                    name: "std".to_string()
                },
                PackageSpec::Registry {
                    name: "nginx".to_string(),
                    version: "1.2.3".to_string()
                },
            ]
        );
    }

    #[test]
    fn rejects_future_version_requirement() {
        let toml = "[eiko]\nversion = \">=99.0.0\"\n";
        assert!(matches!(
            ProjectSettings::parse(toml),
            Err(Error::ImportVersionMismatch { .. })
        ));
    }

    #[test]
    fn package_spec_forms() {
        assert_eq!(
            "GH://a/b".parse::<PackageSpec>().unwrap(),
            PackageSpec::GitHub {
                owner: "a".to_string(),
                name: "b".to_string()
            }
        );
        assert_eq!(
            "pkg@0.2".parse::<PackageSpec>().unwrap(),
            PackageSpec::Registry {
                name: "pkg".to_string(),
                version: "0.2".to_string()
            }
        );
        assert!("GH://broken".parse::<PackageSpec>().is_err());
    }
}
