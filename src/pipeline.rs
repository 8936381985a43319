use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use crate::config::ReleaseConfig;
use crate::context::ReleaseContext;
use crate::error::{Outcome, PipelineError, PipelineResult};
use crate::observability::PipelineEvent;

/// One step of a release.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fills in missing configuration. Every stage's defaults run before
    /// any stage runs.
    fn defaults(&self, _config: &mut ReleaseConfig) -> PipelineResult<()> {
        Ok(())
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome>;
}

type StageConstructor = Arc<dyn Fn() -> Box<dyn Stage> + Send + Sync>;

pub struct StageRegistry {
    factories: HashMap<String, StageConstructor>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Stage> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(constructor));
    }

    pub fn create(&self, name: &str) -> PipelineResult<Box<dyn Stage>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            PipelineError::config(format!(
                "Unknown stage '{}'. Available stages: {}",
                name,
                self.known_stages().join(", ")
            ))
        })?;
        Ok(factory())
    }

    pub fn known_stages(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Defaulting,
    Running {
        index: usize,
        stage: &'static str,
    },
    Done,
    Failed {
        index: usize,
        stage: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: &'static str,
    pub outcome: Outcome,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stages: Vec<StageReport>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn skipped(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|r| r.outcome.is_skipped())
    }
}

/// Runs stages strictly in order. A skip moves on; the first error stops
/// the run and is handed back as the stage produced it.
pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
    state: RunState,
}

impl Orchestrator {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            state: RunState::Pending,
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Name of the stage that failed the last run, if any.
    pub fn failed_stage(&self) -> Option<&'static str> {
        match self.state {
            RunState::Failed { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Applies every stage's defaults to `config`, in pipeline order.
    pub fn apply_defaults(&self, config: &mut ReleaseConfig) -> PipelineResult<()> {
        for stage in &self.stages {
            stage.defaults(config)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(stages = self.stages.len()))]
    pub fn run(&mut self, ctx: &mut ReleaseContext) -> PipelineResult<RunSummary> {
        let started = Instant::now();
        let events = ctx.events().clone();

        self.state = RunState::Defaulting;
        for (index, stage) in self.stages.iter().enumerate() {
            let stage_started = Instant::now();
            if let Err(err) = stage.defaults(&mut ctx.config) {
                events.emit(&PipelineEvent::StageFailed {
                    stage: stage.name(),
                    error: &err,
                    duration: stage_started.elapsed(),
                });
                events.emit(&PipelineEvent::RunFinished {
                    success: false,
                    duration: started.elapsed(),
                });
                self.state = RunState::Failed {
                    index,
                    stage: stage.name(),
                    message: err.to_string(),
                };
                return Err(err);
            }
        }

        let ctx: &ReleaseContext = ctx;
        let mut reports = Vec::with_capacity(self.stages.len());
        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            self.state = RunState::Running { index, stage: name };
            let span = tracing::span!(tracing::Level::INFO, "stage", stage = name);
            let _span_guard = span.enter();

            events.emit(&PipelineEvent::StageStarted { index, stage: name });
            let stage_started = Instant::now();
            match stage.run(ctx) {
                Ok(outcome) => {
                    let duration = stage_started.elapsed();
                    match &outcome {
                        Outcome::Completed => events.emit(&PipelineEvent::StageCompleted {
                            stage: name,
                            duration,
                        }),
                        Outcome::Skipped(reason) => events.emit(&PipelineEvent::StageSkipped {
                            stage: name,
                            reason,
                            duration,
                        }),
                    }
                    reports.push(StageReport {
                        stage: name,
                        outcome,
                        duration,
                    });
                }
                Err(err) => {
                    events.emit(&PipelineEvent::StageFailed {
                        stage: name,
                        error: &err,
                        duration: stage_started.elapsed(),
                    });
                    events.emit(&PipelineEvent::RunFinished {
                        success: false,
                        duration: started.elapsed(),
                    });
                    self.state = RunState::Failed {
                        index,
                        stage: name,
                        message: err.to_string(),
                    };
                    return Err(err);
                }
            }
        }

        let duration = started.elapsed();
        events.emit(&PipelineEvent::RunFinished {
            success: true,
            duration,
        });
        self.state = RunState::Done;
        Ok(RunSummary {
            stages: reports,
            duration,
        })
    }
}

/// Instantiates `names` from the registry, dropping `publish` when
/// `skip_publish` is set.
pub fn build_pipeline<S: AsRef<str>>(
    registry: &StageRegistry,
    names: &[S],
    skip_publish: bool,
) -> PipelineResult<Orchestrator> {
    let mut stages = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        if skip_publish && name == "publish" {
            tracing::info!("Skipping publish stage");
            continue;
        }
        stages.push(registry.create(name)?);
    }
    Ok(Orchestrator::new(stages))
}
