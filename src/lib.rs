pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod init;
pub mod limiter;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod stages;
pub mod target;
pub mod template;
pub mod validation;

pub use artifact::{Artifact, ArtifactKind, Catalog};
pub use config::ReleaseConfig;
pub use context::{Capabilities, ReleaseContext, ReleaseInfo};
pub use error::{Outcome, PipelineError, PipelineResult};
pub use pipeline::{Orchestrator, StageRegistry};
