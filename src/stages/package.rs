use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::artifact::{Artifact, ArtifactKind, EXTRA_FORMAT, EXTRA_ID, and, by_kind, by_os};
use crate::config::{PackageConfig, ReleaseConfig};
use crate::context::ReleaseContext;
use crate::error::{Outcome, PipelineError, PipelineResult, ensure_parent};
use crate::group::fan_out;
use crate::pipeline::Stage;
use crate::stages::default_string;
use crate::template::{self, Scope, render};

pub const NAME: &str = "package";
pub const DEFAULT_NAME_TEMPLATE: &str = "{project}_{version}_{os}_{arch}{armv}";
pub const DEFAULT_BINDIR: &str = "/usr/local/bin";

/// A file to install, from `source` on disk to `destination` in the
/// package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageContent {
    pub source: PathBuf,
    pub destination: String,
}

/// Everything a packager needs to produce one package.
#[derive(Debug, Clone)]
pub struct PackageRequest<'a> {
    pub format: String,
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub arm: String,
    pub contents: Vec<PackageContent>,
    pub info: &'a PackageConfig,
}

impl PackageRequest<'_> {
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |message: &str| PipelineError::Package {
            format: self.format.clone(),
            message: message.to_string(),
        };
        if self.name.is_empty() {
            return Err(invalid("package name cannot be empty"));
        }
        if self.version.is_empty() {
            return Err(invalid("package version cannot be empty"));
        }
        if self.contents.is_empty() {
            return Err(invalid("package has no contents"));
        }
        Ok(())
    }
}

/// Writes an OS package of one format.
pub trait Packager: Send + Sync {
    fn package(&self, request: &PackageRequest<'_>, output: &Path) -> PipelineResult<()>;
}

pub struct PackageStage;

impl Stage for PackageStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn defaults(&self, config: &mut ReleaseConfig) -> PipelineResult<()> {
        let packages = &mut config.packages;
        if packages.formats.is_empty() {
            return Ok(());
        }
        default_string(&mut packages.name_template, DEFAULT_NAME_TEMPLATE);
        default_string(&mut packages.package_name, &config.project_name);
        default_string(&mut packages.bindir, DEFAULT_BINDIR);
        template::check(&packages.name_template, Scope::Artifact)
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome> {
        let config = &ctx.config.packages;
        if config.formats.is_empty() {
            return Ok(Outcome::skip("no package formats configured"));
        }
        let packagers = config
            .formats
            .iter()
            .map(|format| Ok((format.as_str(), ctx.capabilities.packager(format)?.clone())))
            .collect::<PipelineResult<Vec<_>>>()?;

        let linux = ctx
            .catalog
            .filter(&and(vec![by_kind(ArtifactKind::Binary), by_os("linux")]));
        if linux.is_empty() {
            return Ok(Outcome::skip("no linux binaries to package"));
        }

        let mut jobs = Vec::new();
        for binaries in linux.group_by_platform().into_values() {
            for (format, packager) in &packagers {
                jobs.push((*format, packager.clone(), binaries.clone()));
            }
        }
        fan_out(&ctx.limiter, jobs, |(format, packager, binaries)| {
            create_package(ctx, config, format, packager.as_ref(), &binaries)
        })?;
        Ok(Outcome::Completed)
    }
}

fn create_package(
    ctx: &ReleaseContext,
    config: &PackageConfig,
    format: &str,
    packager: &dyn Packager,
    binaries: &[Arc<Artifact>],
) -> PipelineResult<()> {
    let first = &binaries[0];
    let vars = ctx.template_vars()?.with_artifact(first).with("format", format);
    let name = format!("{}.{format}", render(&config.name_template, &vars)?);
    let output = ctx.config.dist.join(&name);

    let bindir = config.bindir.trim_end_matches('/');
    let mut contents: Vec<PackageContent> = binaries
        .iter()
        .map(|binary| PackageContent {
            source: binary.path.clone(),
            destination: format!("{bindir}/{}", binary.name),
        })
        .collect();
    contents.extend(config.files.iter().map(|(source, destination)| PackageContent {
        source: PathBuf::from(source),
        destination: destination.clone(),
    }));

    let request = PackageRequest {
        format: format.to_string(),
        name: config.package_name.clone(),
        version: ctx.info.version.clone(),
        os: first.os.clone(),
        arch: first.arch.clone(),
        arm: first.arm.clone(),
        contents,
        info: config,
    };
    request.validate()?;

    info!(package = %output.display(), format, "Creating package");
    ensure_parent(&output)?;
    packager.package(&request, &output)?;

    let mut package = Artifact::new(ArtifactKind::LinuxPackage, name, output)
        .with_platform(&first.os, &first.arch, &first.arm, &first.mips)
        .with_extra(EXTRA_FORMAT, format);
    if let Some(id) = first.id()
        && binaries.iter().all(|b| b.id() == Some(id))
    {
        package = package.with_extra(EXTRA_ID, id);
    }
    ctx.catalog.add(package);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(info: &PackageConfig) -> PackageRequest<'_> {
        PackageRequest {
            format: "deb".into(),
            name: "demo".into(),
            version: "1.0.0".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            arm: String::new(),
            contents: vec![PackageContent {
                source: "dist/demo".into(),
                destination: "/usr/local/bin/demo".into(),
            }],
            info,
        }
    }

    #[test]
    fn empty_name_fails_validation() {
        let info = PackageConfig::default();
        assert!(request(&info).validate().is_ok());

        let mut unnamed = request(&info);
        unnamed.name.clear();
        let err = unnamed.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "deb packaging failed: package name cannot be empty"
        );
    }

    #[test]
    fn defaults_only_apply_when_formats_are_set() {
        let mut config = ReleaseConfig {
            project_name: "demo".into(),
            ..ReleaseConfig::default()
        };
        PackageStage.defaults(&mut config).unwrap();
        assert!(config.packages.package_name.is_empty());

        config.packages.formats = vec!["deb".into()];
        PackageStage.defaults(&mut config).unwrap();
        assert_eq!(config.packages.package_name, "demo");
        assert_eq!(config.packages.bindir, DEFAULT_BINDIR);
        assert_eq!(config.packages.name_template, DEFAULT_NAME_TEMPLATE);
    }
}
