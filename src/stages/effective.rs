use std::fs::File;
use std::io;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::ReleaseConfig;
use crate::context::ReleaseContext;
use crate::error::{IoResultExt, Outcome, PipelineError, PipelineResult};
use crate::pipeline::Stage;

pub const NAME: &str = "effective-config";
pub const FILE_NAME: &str = "config.yaml";

/// Configuration after defaults, as the release actually used it.
#[derive(Debug, Serialize)]
pub struct EffectiveConfig<'a> {
    pub generated_at: DateTime<Utc>,
    pub tag: &'a str,
    pub version: &'a str,
    pub commit: &'a str,
    pub config_hash: String,
    pub config: &'a ReleaseConfig,
}

pub struct EffectiveConfigStage;

impl Stage for EffectiveConfigStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome> {
        let path = ctx.config.dist.join(FILE_NAME);
        let effective = EffectiveConfig {
            generated_at: Utc::now(),
            tag: &ctx.info.tag,
            version: &ctx.info.version,
            commit: &ctx.info.commit,
            config_hash: hash_config(&ctx.config)?,
            config: &ctx.config,
        };

        let file = File::create(&path).at("create", &path)?;
        serde_yaml::to_writer(file, &effective).map_err(|err| {
            PipelineError::io_at("write", &path, io::Error::other(err))
        })?;
        info!(path = %path.display(), "Wrote effective config");
        Ok(Outcome::Completed)
    }
}

fn hash_config(config: &ReleaseConfig) -> PipelineResult<String> {
    let serialized = serde_json::to_vec(config)
        .map_err(|err| PipelineError::io("failed to serialize config", io::Error::other(err)))?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReleaseInfo;

    #[test]
    fn writes_config_with_hash() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReleaseConfig {
            project_name: "demo".into(),
            dist: dir.path().to_path_buf(),
            ..ReleaseConfig::default()
        };
        let ctx = ReleaseContext::new(config, ReleaseInfo::new("v2.0.0", "cafe"));

        EffectiveConfigStage.run(&ctx).unwrap();

        let written = std::fs::read_to_string(dir.path().join(FILE_NAME)).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&written).unwrap();
        assert_eq!(value["tag"].as_str(), Some("v2.0.0"));
        assert_eq!(value["config"]["project_name"].as_str(), Some("demo"));
        assert_eq!(value["config_hash"].as_str().map(str::len), Some(64));
    }
}
