use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{
    ArchiveConfig, BuildConfig, FormatOverride, PublishTarget, ReleaseConfig,
};
use crate::target::BuildTarget;

pub const STARTERS: &[&str] = &["cargo", "script"];

/// Writes a starter configuration to `destination`. Refuses to overwrite an
/// existing file unless `force` is set.
pub fn generate_config(
    starter: &str,
    project: &str,
    destination: &Path,
    force: bool,
) -> Result<PathBuf> {
    let config = match starter {
        "cargo" => cargo_starter(project),
        "script" => script_starter(project),
        other => anyhow::bail!(
            "Unknown starter '{other}'. Available starters: {}",
            STARTERS.join(", ")
        ),
    };
    if destination.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            destination.display()
        );
    }

    let rendered = serde_yaml::to_string(&config)?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write config: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

fn cargo_starter(project: &str) -> ReleaseConfig {
    ReleaseConfig {
        project_name: project.into(),
        before: crate::config::BeforeConfig {
            hooks: vec!["cargo test --release".into()],
        },
        builds: vec![BuildConfig {
            binary: project.into(),
            command: "cargo build --release --target-dir target/{target}".into(),
            artifact: Some(format!("target/{{target}}/release/{project}")),
            targets: vec![BuildTarget::new("linux", "amd64")],
            ..BuildConfig::default()
        }],
        archive: ArchiveConfig {
            format: "tar.gz".into(),
            files: vec!["README*".into(), "LICENSE*".into()],
            ..ArchiveConfig::default()
        },
        publish: vec![publish_to_local()],
        ..ReleaseConfig::default()
    }
}

fn script_starter(project: &str) -> ReleaseConfig {
    ReleaseConfig {
        project_name: project.into(),
        builds: vec![BuildConfig {
            binary: project.into(),
            command: "./build.sh {os} {arch} {output}".into(),
            targets: vec![
                BuildTarget::new("linux", "amd64"),
                BuildTarget::new("linux", "arm").with_arm("7"),
                BuildTarget::new("darwin", "arm64"),
                BuildTarget::new("windows", "amd64"),
            ],
            ..BuildConfig::default()
        }],
        archive: ArchiveConfig {
            format: "tar.gz".into(),
            format_overrides: vec![FormatOverride {
                os: "windows".into(),
                format: "zip".into(),
            }],
            ..ArchiveConfig::default()
        },
        publish: vec![publish_to_local()],
        ..ReleaseConfig::default()
    }
}

fn publish_to_local() -> PublishTarget {
    PublishTarget {
        provider: "file".into(),
        bucket: "./releases".into(),
        ..PublishTarget::default()
    }
}
