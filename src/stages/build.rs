//! Cross-compiles every configured build for each of its targets.
//!
//! Per build: the pre hook runs once, then one task per target goes through
//! the release limiter, then the post hook runs once. A hook failure or a
//! failed target stops the build; the post hook does not run after a
//! failure.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::artifact::{Artifact, ArtifactKind, EXTRA_BINARY, EXTRA_ID};
use crate::config::{BuildConfig, ReleaseConfig, parse_env};
use crate::context::ReleaseContext;
use crate::error::{IoResultExt, Outcome, PipelineError, PipelineResult, ensure_parent};
use crate::group::fan_out;
use crate::pipeline::Stage;
use crate::process::{run_captured, run_hook, split_command};
use crate::stages::default_string;
use crate::target::BuildTarget;
use crate::template::{self, Scope, TemplateVars, render};

pub const NAME: &str = "build";
pub const DEFAULT_NAME_TEMPLATE: &str = "{binary}_{os}_{arch}{armv}";

pub fn default_targets() -> Vec<BuildTarget> {
    vec![
        BuildTarget::new("linux", "amd64"),
        BuildTarget::new("darwin", "amd64"),
        BuildTarget::new("windows", "amd64"),
    ]
}

/// One target's worth of work handed to a [`Builder`].
#[derive(Debug)]
pub struct BuildRequest<'a> {
    pub build: &'a BuildConfig,
    pub target: &'a BuildTarget,
    /// Where the binary must end up.
    pub output: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub vars: &'a TemplateVars,
}

/// Produces a binary for one target.
pub trait Builder: Send + Sync {
    fn build(&self, request: &BuildRequest<'_>) -> PipelineResult<()>;
}

/// Runs the build's templated `command` with `RELCRAFT_OS`, `RELCRAFT_ARCH`,
/// `RELCRAFT_ARM`, `RELCRAFT_MIPS`, `RELCRAFT_TARGET` and `RELCRAFT_OUTPUT`
/// set.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandBuilder;

impl Builder for CommandBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> PipelineResult<()> {
        let target = request.target.canonical();
        let command = render(&request.build.command, request.vars)?;
        let argv = split_command(&command)?;

        let mut env = request.env.clone();
        env.insert("RELCRAFT_OS".into(), request.target.os.clone());
        env.insert("RELCRAFT_ARCH".into(), request.target.arch.clone());
        env.insert("RELCRAFT_ARM".into(), request.target.arm.clone());
        env.insert("RELCRAFT_MIPS".into(), request.target.mips.clone());
        env.insert("RELCRAFT_TARGET".into(), target.clone());
        env.insert(
            "RELCRAFT_OUTPUT".into(),
            request.output.display().to_string(),
        );

        ensure_parent(request.output)?;
        let output = run_captured(&argv, &env, request.build.dir.as_deref()).map_err(|err| {
            PipelineError::Build {
                target: target.clone(),
                output: format!("{command}: {err}"),
            }
        })?;
        if !output.success() {
            return Err(PipelineError::Build {
                target,
                output: output.combined,
            });
        }

        if let Some(artifact) = &request.build.artifact {
            let source = PathBuf::from(render(artifact, request.vars)?);
            let source = match &request.build.dir {
                Some(dir) if source.is_relative() => dir.join(source),
                _ => source,
            };
            fs::copy(&source, request.output).at("copy build output", &source)?;
        }

        if !request.output.is_file() {
            return Err(PipelineError::io_at(
                "find build output",
                request.output,
                io::Error::new(io::ErrorKind::NotFound, "the build did not produce it"),
            ));
        }
        Ok(())
    }
}

pub struct BuildStage;

impl Stage for BuildStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn defaults(&self, config: &mut ReleaseConfig) -> PipelineResult<()> {
        if config.project_name.is_empty()
            && let Some(first) = config.builds.iter().find(|b| !b.binary.is_empty())
        {
            config.project_name = first.binary.clone();
        }

        let mut seen = BTreeSet::new();
        for build in &mut config.builds {
            default_string(&mut build.binary, &config.project_name);
            if build.binary.is_empty() {
                return Err(PipelineError::config(
                    "build has no binary name and no project_name to derive it from",
                ));
            }
            default_string(&mut build.id, &build.binary.clone());
            default_string(&mut build.name_template, DEFAULT_NAME_TEMPLATE);
            if build.targets.is_empty() {
                build.targets = default_targets();
            }
            if build.command.trim().is_empty() {
                return Err(PipelineError::config(format!(
                    "build '{}' has no command",
                    build.id
                )));
            }
            if !seen.insert(build.id.clone()) {
                return Err(PipelineError::config(format!(
                    "found 2 builds with the ID '{}', please fix your config",
                    build.id
                )));
            }

            template::check(&build.command, Scope::Command)?;
            template::check(&build.name_template, Scope::Target)?;
            if let Some(artifact) = &build.artifact {
                template::check(artifact, Scope::Command)?;
            }
            for hook in [&build.hooks.pre, &build.hooks.post].into_iter().flatten() {
                template::check(hook, Scope::Build)?;
            }
        }
        Ok(())
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome> {
        if ctx.config.builds.is_empty() {
            return Ok(Outcome::skip("no builds configured"));
        }
        for build in &ctx.config.builds {
            run_build(ctx, build)?;
        }
        Ok(Outcome::Completed)
    }
}

struct TargetJob {
    target: BuildTarget,
    vars: TemplateVars,
    output: PathBuf,
}

fn run_build(ctx: &ReleaseContext, build: &BuildConfig) -> PipelineResult<()> {
    let mut env = ctx.env()?;
    env.extend(parse_env(&build.env)?);
    let vars = ctx
        .template_vars_with_env(env.clone())
        .with("binary", build.binary.as_str())
        .with("id", build.id.as_str());

    if let Some(pre) = &build.hooks.pre {
        run_hook(&render(pre, &vars)?, &env)?;
    }

    // Resolve every output path up front so a bad template fails before
    // anything is spawned.
    let jobs = build
        .targets
        .iter()
        .map(|target| {
            let target_vars = vars.clone().with_target(target);
            let folder = render(&build.name_template, &target_vars)?;
            let output = ctx
                .config
                .dist
                .join(folder)
                .join(format!("{}{}", build.binary, target.executable_suffix()));
            Ok(TargetJob {
                target: target.clone(),
                vars: target_vars.with("output", output.display().to_string()),
                output,
            })
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    let builder = ctx.capabilities.builder();
    fan_out(&ctx.limiter, jobs, |job| {
        info!(binary = %build.binary, target = %job.target, "Building");
        builder.build(&BuildRequest {
            build,
            target: &job.target,
            output: &job.output,
            env: &env,
            vars: &job.vars,
        })?;
        ctx.catalog.add(
            Artifact::new(
                ArtifactKind::Binary,
                format!("{}{}", build.binary, job.target.executable_suffix()),
                job.output.clone(),
            )
            .with_platform(
                &job.target.os,
                &job.target.arch,
                &job.target.arm,
                &job.target.mips,
            )
            .with_extra(EXTRA_ID, build.id.as_str())
            .with_extra(EXTRA_BINARY, build.binary.as_str()),
        );
        Ok(())
    })?;

    if let Some(post) = &build.hooks.post {
        run_hook(&render(post, &vars)?, &env)?;
    }
    Ok(())
}
