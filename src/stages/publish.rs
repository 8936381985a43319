use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::artifact::{Artifact, ArtifactKind, by_ids, by_kinds};
use crate::config::ReleaseConfig;
use crate::context::ReleaseContext;
use crate::error::{IoResultExt, Outcome, PipelineError, PipelineResult, ensure_parent};
use crate::group::fan_out;
use crate::pipeline::Stage;
use crate::stages::default_string;
use crate::template::{self, Scope, render};

pub const NAME: &str = "publish";
pub const DEFAULT_FOLDER: &str = "{project}/{tag}";

/// Kinds a publisher uploads.
pub const PUBLISHED_KINDS: &[ArtifactKind] = &[
    ArtifactKind::UploadableArchive,
    ArtifactKind::UploadableBinary,
    ArtifactKind::LinuxPackage,
    ArtifactKind::Checksum,
    ArtifactKind::Signature,
];

/// Rendered upload location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub provider: String,
    pub bucket: String,
    pub folder: String,
}

pub trait Publisher: Send + Sync {
    fn publish(&self, artifact: &Artifact, destination: &Destination) -> PipelineResult<()>;
}

/// The `file` provider: `bucket` is a local directory, uploads are copies.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryPublisher;

impl DirectoryPublisher {
    pub const PROVIDER: &'static str = "file";
}

impl Publisher for DirectoryPublisher {
    fn publish(&self, artifact: &Artifact, destination: &Destination) -> PipelineResult<()> {
        let target: PathBuf = [
            destination.bucket.as_str(),
            destination.folder.as_str(),
            artifact.name.as_str(),
        ]
        .iter()
        .collect();
        ensure_parent(&target)?;
        fs::copy(&artifact.path, &target)
            .at("copy", &artifact.path)
            .map_err(|err| PipelineError::Publish {
                provider: destination.provider.clone(),
                message: err.to_string(),
            })?;
        Ok(())
    }
}

pub struct PublishStage;

impl Stage for PublishStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn defaults(&self, config: &mut ReleaseConfig) -> PipelineResult<()> {
        for target in &mut config.publish {
            if target.bucket.is_empty() || target.provider.is_empty() {
                return Err(PipelineError::config("bucket or provider cannot be empty"));
            }
            default_string(&mut target.folder, DEFAULT_FOLDER);
            template::check(&target.folder, Scope::Release)?;
        }
        Ok(())
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome> {
        if ctx.config.publish.is_empty() {
            return Ok(Outcome::skip("publish section is not configured"));
        }
        let eligible = ctx.catalog.filter(&by_kinds(PUBLISHED_KINDS));
        if eligible.is_empty() {
            return Ok(Outcome::skip("no artifacts to publish"));
        }

        let vars = ctx.template_vars()?;
        let mut jobs: Vec<(Arc<dyn Publisher>, Arc<Destination>, Arc<Artifact>)> = Vec::new();
        for target in &ctx.config.publish {
            let publisher = ctx.capabilities.publisher(&target.provider)?.clone();
            let destination = Arc::new(Destination {
                provider: target.provider.clone(),
                bucket: target.bucket.clone(),
                folder: render(&target.folder, &vars)?,
            });
            let selected = if target.ids.is_empty() {
                eligible.clone()
            } else {
                eligible.filter(&by_ids(&target.ids))
            };
            for artifact in selected.list() {
                jobs.push((publisher.clone(), destination.clone(), artifact));
            }
        }

        fan_out(&ctx.limiter, jobs, |(publisher, destination, artifact)| {
            info!(
                artifact = %artifact.name,
                provider = %destination.provider,
                bucket = %destination.bucket,
                folder = %destination.folder,
                "Publishing"
            );
            publisher.publish(&artifact, &destination)
        })?;
        Ok(Outcome::Completed)
    }
}
