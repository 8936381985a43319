use std::fs;
use std::sync::Mutex;

use tracing::info;

use crate::artifact::{Artifact, ArtifactKind, by_kinds};
use crate::config::ReleaseConfig;
use crate::context::ReleaseContext;
use crate::error::{IoResultExt, Outcome, PipelineResult, ensure_parent};
use crate::group::fan_out;
use crate::pipeline::Stage;
use crate::stages::default_string;
use crate::template::{self, Scope, render};

pub const NAME: &str = "checksum";
pub const DEFAULT_NAME_TEMPLATE: &str = "{project}_{version}_checksums.txt";

/// Kinds that get a line in the checksums file.
pub const CHECKSUMMED_KINDS: &[ArtifactKind] = &[
    ArtifactKind::UploadableArchive,
    ArtifactKind::UploadableBinary,
    ArtifactKind::LinuxPackage,
];

pub struct ChecksumStage;

impl Stage for ChecksumStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn defaults(&self, config: &mut ReleaseConfig) -> PipelineResult<()> {
        default_string(&mut config.checksum.name_template, DEFAULT_NAME_TEMPLATE);
        template::check(&config.checksum.name_template, Scope::Release)
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome> {
        let artifacts = ctx.catalog.filter(&by_kinds(CHECKSUMMED_KINDS)).list();
        if artifacts.is_empty() {
            return Ok(Outcome::skip("no artifacts to checksum"));
        }

        let name = render(&ctx.config.checksum.name_template, &ctx.template_vars()?)?;
        let path = ctx.config.dist.join(&name);
        let algorithm = ctx.config.checksum.algorithm;

        let lines = Mutex::new(Vec::with_capacity(artifacts.len()));
        fan_out(&ctx.limiter, artifacts, |artifact| {
            let digest = artifact.digest(algorithm)?;
            lines
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((artifact.name.clone(), digest));
            Ok(())
        })?;

        let mut lines = lines.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        lines.sort();
        let content: String = lines
            .iter()
            .map(|(name, digest)| format!("{digest}  {name}\n"))
            .collect();

        info!(file = %path.display(), algorithm = algorithm.as_str(), "Writing checksums");
        ensure_parent(&path)?;
        fs::write(&path, content).at("write", &path)?;
        ctx.catalog
            .add(Artifact::new(ArtifactKind::Checksum, name, path));
        Ok(Outcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ChecksumAlgorithm;
    use crate::context::ReleaseInfo;
    use crate::error::PipelineError;

    #[test]
    fn nothing_to_hash_is_a_skip() {
        let ctx = ReleaseContext::new(ReleaseConfig::default(), ReleaseInfo::default());
        assert!(ChecksumStage.run(&ctx).unwrap().is_skipped());
    }

    #[test]
    fn writes_sorted_lines_and_registers_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReleaseConfig {
            project_name: "demo".into(),
            dist: dir.path().to_path_buf(),
            ..ReleaseConfig::default()
        };
        ChecksumStage.defaults(&mut config).unwrap();
        let ctx = ReleaseContext::new(config, ReleaseInfo::new("v1.0.0", "abc"));

        for name in ["zeta.tar.gz", "alpha.tar.gz"] {
            let path = dir.path().join(name);
            fs::write(&path, name).unwrap();
            ctx.catalog
                .add(Artifact::new(ArtifactKind::UploadableArchive, name, path));
        }
        // Build outputs are not checksummed.
        let raw = dir.path().join("raw");
        fs::write(&raw, "raw").unwrap();
        ctx.catalog.add(Artifact::new(ArtifactKind::Binary, "raw", raw));

        ChecksumStage.run(&ctx).unwrap();

        let content = fs::read_to_string(dir.path().join("demo_1.0.0_checksums.txt")).unwrap();
        let names: Vec<_> = content
            .lines()
            .map(|l| l.split_once("  ").unwrap().1)
            .collect();
        assert_eq!(names, vec!["alpha.tar.gz", "zeta.tar.gz"]);

        let expected = Artifact::new(ArtifactKind::Binary, "alpha", dir.path().join("alpha.tar.gz"))
            .digest(ChecksumAlgorithm::Sha256)
            .unwrap();
        assert!(content.starts_with(&expected));

        let checksums = ctx.catalog.filter(&crate::artifact::by_kind(ArtifactKind::Checksum));
        assert_eq!(checksums.len(), 1);
    }

    #[test]
    fn platform_placeholders_are_rejected_in_defaults() {
        let mut config = ReleaseConfig::default();
        config.checksum.name_template = "{os}_checksums.txt".into();
        let err = ChecksumStage.defaults(&mut config).unwrap_err();
        assert!(matches!(err, PipelineError::Template { .. }), "{err:?}");
        assert!(err.to_string().contains("'os' is not available"));
    }
}
