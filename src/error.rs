use std::io;
use std::path::Path;

use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Everything a stage can fail with. Stage errors travel up through the
/// orchestrator untouched, so callers can match on the variant that the
/// failing task produced.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("hook failed: {command}: {status}; output: {output}")]
    Hook {
        command: String,
        status: String,
        output: String,
    },

    #[error("build failed for {target}:\n{output}")]
    Build { target: String, output: String },

    #[error("{format} packaging failed: {message}")]
    Package { format: String, message: String },

    #[error("publish to {provider} failed: {message}")]
    Publish { provider: String, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("globbing failed for pattern {pattern}: {message}")]
    Glob { pattern: String, message: String },

    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
        Self::io(format!("failed to {action} {}", path.display()), source)
    }
}

/// Result of a stage that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Nothing applicable to do. The orchestrator moves on as if the stage
    /// succeeded.
    Skipped(String),
}

impl Outcome {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Adds path context to raw I/O results.
pub(crate) trait IoResultExt<T> {
    fn at(self, action: &str, path: &Path) -> PipelineResult<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, action: &str, path: &Path) -> PipelineResult<T> {
        self.map_err(|err| PipelineError::io_at(action, path, err))
    }
}

pub(crate) fn ensure_parent(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).at("create directory", parent)?;
    }
    Ok(())
}
