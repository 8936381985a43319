use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::artifact::ArtifactKind;
use crate::error::PipelineError;

/// Progress notifications emitted while a release runs.
#[derive(Debug, Clone, Copy)]
pub enum PipelineEvent<'a> {
    StageStarted {
        index: usize,
        stage: &'a str,
    },
    StageCompleted {
        stage: &'a str,
        duration: Duration,
    },
    StageSkipped {
        stage: &'a str,
        reason: &'a str,
        duration: Duration,
    },
    StageFailed {
        stage: &'a str,
        error: &'a PipelineError,
        duration: Duration,
    },
    ArtifactAdded {
        name: &'a str,
        path: &'a Path,
        kind: ArtifactKind,
    },
    RunFinished {
        success: bool,
        duration: Duration,
    },
}

/// Receiver for pipeline events. Injected into the catalog and the
/// orchestrator so neither reaches for a global logger.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent<'_>);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &PipelineEvent<'_>) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &PipelineEvent<'_>) {
        match *event {
            PipelineEvent::StageStarted { index, stage } => {
                info!(stage, index, "Running stage");
            }
            PipelineEvent::StageCompleted { stage, duration } => {
                debug!(
                    stage,
                    duration_ms = duration.as_secs_f64() * 1_000.0,
                    "Stage completed"
                );
            }
            PipelineEvent::StageSkipped { stage, reason, .. } => {
                info!(stage, reason, "Stage skipped");
            }
            PipelineEvent::StageFailed { stage, error, .. } => {
                error!(stage, error = %error, "Stage failed");
            }
            PipelineEvent::ArtifactAdded { name, path, kind } => {
                debug!(name, path = %path.display(), kind = %kind, "Added new artifact");
            }
            PipelineEvent::RunFinished { success, duration } => {
                info!(
                    success,
                    duration_ms = duration.as_secs_f64() * 1_000.0,
                    "Release pipeline finished"
                );
            }
        }
    }
}

/// Sends each event to every inner sink, in order.
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for CompositeSink {
    fn emit(&self, event: &PipelineEvent<'_>) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub artifacts: BTreeMap<String, u64>,
    pub total_duration_ms: f64,
    pub succeeded: Option<bool>,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub skipped: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

impl StageMetrics {
    fn record_duration(&mut self, duration: Duration) {
        self.calls += 1;
        let duration_ms = duration.as_secs_f64() * 1_000.0;
        self.total_duration_ms += duration_ms;
        if duration_ms > self.max_duration_ms {
            self.max_duration_ms = duration_ms;
        }
    }
}

/// Aggregates stage timings and artifact counts from the event stream.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl EventSink for MetricsCollector {
    fn emit(&self, event: &PipelineEvent<'_>) {
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        match *event {
            PipelineEvent::StageStarted { .. } => {}
            PipelineEvent::StageCompleted { stage, duration } => {
                guard
                    .stages
                    .entry(stage.to_string())
                    .or_default()
                    .record_duration(duration);
            }
            PipelineEvent::StageSkipped {
                stage, duration, ..
            } => {
                let metrics = guard.stages.entry(stage.to_string()).or_default();
                metrics.record_duration(duration);
                metrics.skipped += 1;
            }
            PipelineEvent::StageFailed {
                stage, duration, ..
            } => {
                let metrics = guard.stages.entry(stage.to_string()).or_default();
                metrics.record_duration(duration);
                metrics.failures += 1;
            }
            PipelineEvent::ArtifactAdded { kind, .. } => {
                *guard.artifacts.entry(kind.as_str().to_string()).or_default() += 1;
            }
            PipelineEvent::RunFinished { success, duration } => {
                guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
                guard.succeeded = Some(success);
            }
        }
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        artifact_count = snapshot.artifacts.values().sum::<u64>(),
        "Release metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            skipped = metrics.skipped,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Stage metrics"
        );
    }
    for (kind, count) in &snapshot.artifacts {
        info!(kind = kind.as_str(), count, "Artifact metrics");
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP relcraft_stage_runs_total Stage invocation count\n");
        output.push_str("# TYPE relcraft_stage_runs_total counter\n");
        output.push_str("# HELP relcraft_stage_skips_total Stage skip count\n");
        output.push_str("# TYPE relcraft_stage_skips_total counter\n");
        output.push_str("# HELP relcraft_stage_failures_total Stage failure count\n");
        output.push_str("# TYPE relcraft_stage_failures_total counter\n");
        output.push_str(
            "# HELP relcraft_stage_duration_seconds_total Accumulated stage duration in seconds\n",
        );
        output.push_str("# TYPE relcraft_stage_duration_seconds_total counter\n");
        output.push_str(
            "# HELP relcraft_stage_duration_seconds_max Maximum stage duration in seconds\n",
        );
        output.push_str("# TYPE relcraft_stage_duration_seconds_max gauge\n");
        for (stage, metrics) in &self.stages {
            output.push_str(&format!(
                "relcraft_stage_runs_total{{stage=\"{}\"}} {}\n",
                stage, metrics.calls
            ));
            output.push_str(&format!(
                "relcraft_stage_skips_total{{stage=\"{}\"}} {}\n",
                stage, metrics.skipped
            ));
            output.push_str(&format!(
                "relcraft_stage_failures_total{{stage=\"{}\"}} {}\n",
                stage, metrics.failures
            ));
            output.push_str(&format!(
                "relcraft_stage_duration_seconds_total{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.total_duration_ms / 1_000.0
            ));
            output.push_str(&format!(
                "relcraft_stage_duration_seconds_max{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP relcraft_artifacts_total Artifacts added to the catalog\n");
        output.push_str("# TYPE relcraft_artifacts_total counter\n");
        for (kind, count) in &self.artifacts {
            output.push_str(&format!(
                "relcraft_artifacts_total{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }
        output.push_str("# HELP relcraft_pipeline_duration_seconds Total pipeline duration\n");
        output.push_str("# TYPE relcraft_pipeline_duration_seconds gauge\n");
        output.push_str(&format!(
            "relcraft_pipeline_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}
