use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::{ReleaseConfig, parse_env};
use crate::pipeline::{StageRegistry, build_pipeline};
use crate::template::{self, Scope};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Static checks over a configuration, followed by a dry run of every
/// stage's defaults on a copy of it.
pub fn validate_config(config: &ReleaseConfig, registry: &StageRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();
    let stages = config.stage_names();

    for (idx, stage) in stages.iter().enumerate() {
        if let Err(err) = registry.create(stage) {
            report
                .errors
                .push(format!("Stage {} ('{}'): {}", idx + 1, stage, err));
        }
        report.merge(validate_stage_order(idx, stage, &stages));
    }

    if let Err(err) = parse_env(&config.env) {
        report.errors.push(err.to_string());
    }

    if config.builds.is_empty() && stages.iter().any(|s| s == "build") {
        report.warnings.push("No builds configured".into());
    }

    let mut ids = BTreeSet::new();
    for (idx, build) in config.builds.iter().enumerate() {
        let label = if build.id.is_empty() {
            format!("Build {}", idx + 1)
        } else {
            format!("Build {} ('{}')", idx + 1, build.id)
        };
        if build.command.trim().is_empty() {
            report.errors.push(format!("{label}: command cannot be empty"));
        }
        if !build.id.is_empty() && !ids.insert(build.id.as_str()) {
            report.errors.push(format!("{label}: duplicate build id"));
        }
        if let Err(err) = parse_env(&build.env) {
            report.errors.push(format!("{label}: {err}"));
        }
        for (template, scope) in [
            (Some(&build.command), Scope::Command),
            (Some(&build.name_template), Scope::Target),
            (build.artifact.as_ref(), Scope::Command),
            (build.hooks.pre.as_ref(), Scope::Build),
            (build.hooks.post.as_ref(), Scope::Build),
        ] {
            let Some(template) = template else {
                continue;
            };
            if let Err(err) = template::check(template, scope) {
                report.errors.push(format!("{label}: {err}"));
            }
        }
    }

    for (idx, pattern) in config.archive.files.iter().enumerate() {
        if let Err(err) = glob::Pattern::new(pattern) {
            report.errors.push(format!(
                "Archive file pattern {} ('{}') is not a valid glob: {}",
                idx + 1,
                pattern,
                err
            ));
        }
    }

    for hook in &config.before.hooks {
        if let Err(err) = template::check(hook, Scope::Release) {
            report.errors.push(format!("Before hook: {err}"));
        }
    }

    for (idx, target) in config.publish.iter().enumerate() {
        for id in &target.ids {
            if !config.builds.iter().any(|b| &b.id == id || &b.binary == id) {
                report.warnings.push(format!(
                    "Publish target {}: id '{}' does not match any build",
                    idx + 1,
                    id
                ));
            }
        }
    }

    // Only worth running once the static checks pass; it would repeat them.
    if report.is_ok() {
        match build_pipeline(registry, &stages, false) {
            Ok(orchestrator) => {
                let mut resolved = config.clone();
                if let Err(err) = orchestrator.apply_defaults(&mut resolved) {
                    report.errors.push(err.to_string());
                }
            }
            Err(err) => report.errors.push(err.to_string()),
        }
    }

    report
}

fn validate_stage_order(idx: usize, stage: &str, pipeline: &[String]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let earlier = |name: &str| pipeline[..idx].iter().any(|prev| prev == name);
    match stage {
        "archive" | "package" if !earlier("build") => {
            report.errors.push(format!(
                "Stage '{stage}' requires a build stage earlier in the pipeline"
            ));
        }
        "checksum" if !earlier("archive") && !earlier("package") => {
            report.warnings.push(
                "Checksum stage has no archive or package stage before it and will skip".into(),
            );
        }
        "publish" if !earlier("checksum") => {
            report
                .warnings
                .push("Publish stage runs without a checksum stage before it".into());
        }
        _ => {}
    }
    if pipeline[..idx].iter().any(|prev| prev == stage) {
        report
            .warnings
            .push(format!("Stage '{stage}' appears more than once"));
    }
    report
}
