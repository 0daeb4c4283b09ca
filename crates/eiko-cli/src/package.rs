//! `project init`, `package install` and `package release`.
//!
//! Packages are module trees installed into `.eikobot_modules`, which the
//! compiler searches after the entry file's directory. Installation is
//! deliberately simple: local paths copy (or symlink with `-e`), GitHub
//! specs shallow-clone.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tokio::process::Command;
use tracing::{error, info};

use eiko_compiler::project::{PackageSpec, ProjectSettings};

const MODULE_DIR: &str = ".eikobot_modules";

const INIT_TOML: &str = r#"[eiko]
version = ">=0.1.0"

[eiko.project]
entry_point = "main.eiko"
dry_run = false
requires = []
ssh_timeout = 3
"#;

pub fn project_init() -> ExitCode {
    let path = Path::new("eiko.toml");
    if path.exists() {
        error!("eiko.toml already exists");
        return ExitCode::FAILURE;
    }
    if let Err(e) = std::fs::write(path, INIT_TOML) {
        error!("failed to write eiko.toml: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = std::fs::write(Path::new("main.eiko"), "") {
        error!("failed to write main.eiko: {e}");
        return ExitCode::FAILURE;
    }
    info!("initialized eikobot project");
    ExitCode::SUCCESS
}

pub async fn install(spec: Option<&str>, editable: bool) -> ExitCode {
    let specs: Vec<String> = match spec {
        Some(spec) => vec![spec.to_string()],
        None => {
            // No spec: install the project requirements.
            let settings = match ProjectSettings::read(Path::new(".")) {
                Ok(settings) => settings,
                Err(e) => {
                    error!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            settings
                .requires
                .iter()
                .map(|r| match r {
                    PackageSpec::GitHub { owner, name } => format!("GH://{owner}/{name}"),
                    PackageSpec::Registry { name, version } => format!("{name}@{version}"),
                    PackageSpec::Name(name) => name.clone(),
                })
                .collect()
        }
    };

    if specs.is_empty() {
        info!("nothing to install");
        return ExitCode::SUCCESS;
    }

    for spec in specs {
        if let Err(e) = install_one(&spec, editable).await {
            error!("failed to install '{spec}': {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

async fn install_one(spec: &str, editable: bool) -> Result<(), String> {
    let target_root = PathBuf::from(MODULE_DIR);
    std::fs::create_dir_all(&target_root).map_err(|e| e.to_string())?;

    // Local path (including `.`) installs the directory as a module tree.
    let as_path = Path::new(spec);
    if as_path.is_dir() {
        return install_local(as_path, &target_root, editable);
    }

    match spec.parse::<PackageSpec>().map_err(|e| e.to_string())? {
        PackageSpec::GitHub { owner, name } => {
            let url = format!("https://github.com/{owner}/{name}");
            let dest = target_root.join(&name);
            if dest.exists() {
                info!(package = name, "already installed");
                return Ok(());
            }
            info!(package = name, "cloning {url}");
            let status = Command::new("git")
                .args(["clone", "--depth", "1", &url])
                .arg(&dest)
                .status()
                .await
                .map_err(|e| format!("could not run git: {e}"))?;
            if !status.success() {
                return Err(format!("git clone of '{url}' failed"));
            }
            Ok(())
        }
        PackageSpec::Registry { name, version } => Err(format!(
            "'{name}@{version}': registry installs are not supported; use GH://owner/name or a path"
        )),
        PackageSpec::Name(name) => Err(format!(
            "'{name}' is neither a local directory nor a GH:// spec"
        )),
    }
}

fn install_local(source: &Path, target_root: &Path, editable: bool) -> Result<(), String> {
    let source = source
        .canonicalize()
        .map_err(|e| format!("cannot resolve '{}': {e}", source.display()))?;
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| "package directory has no name".to_string())?;
    let dest = target_root.join(name);
    if dest.exists() {
        return Err(format!("'{name}' is already installed"));
    }

    if editable {
        link_dir(&source, &dest)?;
        info!(package = name, "linked (editable)");
    } else {
        copy_tree(&source, &dest).map_err(|e| e.to_string())?;
        info!(package = name, "installed");
    }
    Ok(())
}

#[cfg(unix)]
fn link_dir(source: &Path, dest: &Path) -> Result<(), String> {
    std::os::unix::fs::symlink(source, dest).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn link_dir(_source: &Path, _dest: &Path) -> Result<(), String> {
    Err("editable installs need symlink support".to_string())
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Tag the current repository `v<version>` and push the tag.
pub async fn release(target: &str) -> ExitCode {
    if target != "github" {
        error!("unknown release target '{target}'; only 'github' is supported");
        return ExitCode::FAILURE;
    }
    let settings = match ProjectSettings::read(Path::new(".")) {
        Ok(settings) if settings.exists => settings,
        Ok(_) => {
            error!("no eiko.toml in the current directory");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let version = settings
        .version_requirement
        .as_deref()
        .and_then(|v| v.trim_start_matches(['>', '<', '=', '!']).split(',').next())
        .unwrap_or("0.1.0")
        .trim()
        .to_string();
    let tag = format!("v{version}");

    for args in [
        vec!["tag", "-a", tag.as_str(), "-m", tag.as_str()],
        vec!["push", "origin", tag.as_str()],
    ] {
        let status = match Command::new("git").args(&args).status().await {
            Ok(status) => status,
            Err(e) => {
                error!("could not run git: {e}");
                return ExitCode::FAILURE;
            }
        };
        if !status.success() {
            error!("git {} failed", args.join(" "));
            return ExitCode::FAILURE;
        }
    }
    info!(tag, "release tagged and pushed");
    ExitCode::SUCCESS
}
