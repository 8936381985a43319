//! `{placeholder}` name templates used for folders, archives, checksums and
//! hook commands.
//!
//! `{{` and `}}` produce literal braces. `{env.NAME}` reads an environment
//! variable. Any other placeholder must be present in the [`TemplateVars`]
//! handed to [`render`].

use std::collections::BTreeMap;

use crate::artifact::{Artifact, EXTRA_BINARY};
use crate::error::{PipelineError, PipelineResult};
use crate::target::BuildTarget;

/// Placeholder names a template may use somewhere in a release.
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "project",
    "binary",
    "version",
    "tag",
    "commit",
    "os",
    "arch",
    "arm",
    "armv",
    "mips",
    "target",
    "date",
    "timestamp",
    "output",
    "format",
    "id",
];

#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn with_target(self, target: &BuildTarget) -> Self {
        self.with_platform(&target.os, &target.arch, &target.arm, &target.mips)
            .with("target", target.canonical())
    }

    pub fn with_artifact(self, artifact: &Artifact) -> Self {
        let mut vars =
            self.with_platform(&artifact.os, &artifact.arch, &artifact.arm, &artifact.mips);
        let binary = artifact
            .extra_str(EXTRA_BINARY)
            .unwrap_or_else(|| artifact.name.trim_end_matches(".exe"));
        vars.set("binary", binary);
        if let Some(id) = artifact.id() {
            vars.set("id", id);
        }
        vars
    }

    fn with_platform(self, os: &str, arch: &str, arm: &str, mips: &str) -> Self {
        let armv = if arm.is_empty() {
            String::new()
        } else {
            format!("v{arm}")
        };
        self.with("os", os)
            .with("arch", arch)
            .with("arm", arm)
            .with("armv", armv)
            .with("mips", mips)
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn parse(template: &str) -> PipelineResult<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while !rest.is_empty() {
        let Some(idx) = rest.find(['{', '}']) else {
            segments.push(Segment::Literal(rest));
            break;
        };
        if idx > 0 {
            segments.push(Segment::Literal(&rest[..idx]));
        }
        let tail = &rest[idx..];
        if tail.starts_with("{{") {
            segments.push(Segment::Literal("{"));
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            segments.push(Segment::Literal("}"));
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            return Err(PipelineError::template(
                template,
                format!("unexpected '}}' at offset {idx}"),
            ));
        } else {
            let Some(end) = tail.find('}') else {
                return Err(PipelineError::template(template, "unclosed placeholder"));
            };
            let name = tail[1..end].trim();
            if name.is_empty() {
                return Err(PipelineError::template(template, "empty placeholder"));
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            {
                return Err(PipelineError::template(
                    template,
                    format!("invalid placeholder '{name}'"),
                ));
            }
            segments.push(Segment::Placeholder(name));
            rest = &tail[end + 1..];
        }
    }
    Ok(segments)
}

pub fn render(template: &str, vars: &TemplateVars) -> PipelineResult<String> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(name) => {
                if let Some(var) = name.strip_prefix("env.") {
                    let value = vars.env.get(var).ok_or_else(|| {
                        PipelineError::template(
                            template,
                            format!("environment variable '{var}' is not set"),
                        )
                    })?;
                    out.push_str(value);
                } else {
                    let value = vars.get(name).ok_or_else(|| {
                        PipelineError::template(
                            template,
                            format!("placeholder '{name}' is not available here"),
                        )
                    })?;
                    out.push_str(value);
                }
            }
        }
    }
    Ok(out)
}

/// Where a template is rendered, which decides the placeholders it can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Release-wide: before hooks, checksum file name, publish folder.
    Release,
    /// Per build, outside any target: build pre and post hooks.
    Build,
    /// Per build target: the build's output folder.
    Target,
    /// Build command and artifact path, once the output path is known.
    Command,
    /// Names derived from built binaries: archives and packages.
    Artifact,
}

const RELEASE: &[&str] = &["project", "version", "tag", "commit", "date", "timestamp"];
const PLATFORM: &[&str] = &["os", "arch", "arm", "armv", "mips"];

impl Scope {
    pub fn allows(self, name: &str) -> bool {
        let name = &name;
        RELEASE.contains(name)
            || match self {
                Scope::Release => false,
                Scope::Build => ["binary", "id"].contains(name),
                Scope::Target => {
                    ["binary", "id", "target"].contains(name) || PLATFORM.contains(name)
                }
                Scope::Command => {
                    ["binary", "id", "target", "output"].contains(name)
                        || PLATFORM.contains(name)
                }
                Scope::Artifact => {
                    ["binary", "id", "format"].contains(name) || PLATFORM.contains(name)
                }
            }
    }

    fn label(self) -> &'static str {
        match self {
            Scope::Release => "release",
            Scope::Build => "build hook",
            Scope::Target => "build target",
            Scope::Command => "build command",
            Scope::Artifact => "artifact name",
        }
    }
}

/// Checks a template without values: braces balance and every placeholder
/// is one `scope` provides.
pub fn check(template: &str, scope: Scope) -> PipelineResult<()> {
    for segment in parse(template)? {
        let Segment::Placeholder(name) = segment else {
            continue;
        };
        if name.starts_with("env.") {
            continue;
        }
        if !KNOWN_PLACEHOLDERS.contains(&name) {
            return Err(PipelineError::template(
                template,
                format!("unknown placeholder '{name}'"),
            ));
        }
        if !scope.allows(name) {
            return Err(PipelineError::template(
                template,
                format!(
                    "placeholder '{name}' is not available in {} templates",
                    scope.label()
                ),
            ));
        }
    }
    Ok(())
}
