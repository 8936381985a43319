use std::fs;

use tracing::info;

use crate::config::ReleaseConfig;
use crate::context::ReleaseContext;
use crate::error::{IoResultExt, Outcome, PipelineError, PipelineResult};
use crate::pipeline::Stage;

pub const NAME: &str = "dist";

/// Prepares the output directory every other stage writes into.
pub struct DistStage;

impl Stage for DistStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn defaults(&self, config: &mut ReleaseConfig) -> PipelineResult<()> {
        if config.dist.as_os_str().is_empty() {
            config.dist = "dist".into();
        }
        Ok(())
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome> {
        let dist = &ctx.config.dist;
        if dist.exists() {
            let mut entries = fs::read_dir(dist).at("read", dist)?;
            if entries.next().is_some() {
                if !ctx.config.rm_dist {
                    return Err(PipelineError::config(format!(
                        "{} is not empty, remove it or set rm_dist",
                        dist.display()
                    )));
                }
                info!(dist = %dist.display(), "Removing existing dist directory");
                fs::remove_dir_all(dist).at("remove", dist)?;
            }
        }
        fs::create_dir_all(dist).at("create directory", dist)?;
        Ok(Outcome::Completed)
    }
}
