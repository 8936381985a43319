use crate::config::ReleaseConfig;
use crate::context::ReleaseContext;
use crate::error::{Outcome, PipelineResult};
use crate::pipeline::Stage;
use crate::process::run_hook;
use crate::template::{self, Scope, render};

pub const NAME: &str = "before";

/// Global hooks, run one after another before anything is built.
pub struct BeforeStage;

impl Stage for BeforeStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn defaults(&self, config: &mut ReleaseConfig) -> PipelineResult<()> {
        for hook in &config.before.hooks {
            template::check(hook, Scope::Release)?;
        }
        Ok(())
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome> {
        let hooks = &ctx.config.before.hooks;
        if hooks.is_empty() {
            return Ok(Outcome::skip("no before hooks configured"));
        }
        let vars = ctx.template_vars()?;
        for hook in hooks {
            let line = render(hook, &vars)?;
            run_hook(&line, vars.env())?;
        }
        Ok(Outcome::Completed)
    }
}
