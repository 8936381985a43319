use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::artifact::ChecksumAlgorithm;
use crate::error::{PipelineError, PipelineResult};
use crate::target::BuildTarget;

pub const DEFAULT_CONFIG_FILE: &str = "relcraft.yaml";

/// Stage order used when the configuration does not list one.
pub const DEFAULT_PIPELINE: &[&str] = &[
    "dist",
    "effective-config",
    "before",
    "build",
    "archive",
    "package",
    "checksum",
    "publish",
];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub project_name: String,
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub rm_dist: bool,
    /// `KEY=VALUE` entries added to every hook, build and template.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub pipeline: Vec<String>,
    #[serde(default)]
    pub before: BeforeConfig,
    #[serde(default)]
    pub builds: Vec<BuildConfig>,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub packages: PackageConfig,
    #[serde(default)]
    pub checksum: ChecksumConfig,
    #[serde(default)]
    pub publish: Vec<PublishTarget>,
}

fn default_dist() -> PathBuf {
    PathBuf::from("dist")
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            dist: default_dist(),
            parallelism: None,
            rm_dist: false,
            env: Vec::new(),
            pipeline: Vec::new(),
            before: BeforeConfig::default(),
            builds: Vec::new(),
            archive: ArchiveConfig::default(),
            packages: PackageConfig::default(),
            checksum: ChecksumConfig::default(),
            publish: Vec::new(),
        }
    }
}

impl ReleaseConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Stage names in run order.
    pub fn stage_names(&self) -> Vec<String> {
        if self.pipeline.is_empty() {
            DEFAULT_PIPELINE.iter().map(|s| s.to_string()).collect()
        } else {
            self.pipeline.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BeforeConfig {
    #[serde(default)]
    pub hooks: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BuildConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub binary: String,
    /// Command line producing the binary; templated per target.
    #[serde(default)]
    pub command: String,
    /// Where `command` leaves the binary, if not at `{output}`; templated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub targets: Vec<BuildTarget>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub hooks: BuildHooks,
    /// Folder under dist holding each target's binary.
    #[serde(default)]
    pub name_template: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BuildHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub name_template: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub format_overrides: Vec<FormatOverride>,
    #[serde(default)]
    pub wrap_in_directory: bool,
}

impl ArchiveConfig {
    /// Format for binaries built for `os`, honouring overrides.
    pub fn format_for(&self, os: &str) -> &str {
        self.format_overrides
            .iter()
            .find(|o| o.os == os)
            .map(|o| o.format.as_str())
            .unwrap_or(self.format.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct FormatOverride {
    pub os: String,
    pub format: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PackageConfig {
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub name_template: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub bindir: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub maintainer: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub recommends: Vec<String>,
    /// Extra files, source path to install path.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ChecksumConfig {
    #[serde(default)]
    pub name_template: String,
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PublishTarget {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub folder: String,
    /// Restrict to artifacts of these build ids.
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Parses `KEY=VALUE` entries.
pub fn parse_env(entries: &[String]) -> PipelineResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::config(format!("invalid env entry '{entry}', expected KEY=VALUE"))
            })?;
        env.insert(key.trim().to_string(), value.to_string());
    }
    Ok(env)
}
