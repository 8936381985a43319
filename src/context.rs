use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::artifact::Catalog;
use crate::config::{ReleaseConfig, parse_env};
use crate::error::{PipelineError, PipelineResult};
use crate::limiter::{Limiter, default_parallelism};
use crate::observability::{EventSink, TracingSink};
use crate::stages::build::{Builder, CommandBuilder};
use crate::stages::package::Packager;
use crate::stages::publish::{DirectoryPublisher, Publisher};
use crate::template::TemplateVars;

/// Version metadata of the release being cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub tag: String,
    pub version: String,
    pub commit: String,
    pub date: DateTime<Utc>,
}

impl ReleaseInfo {
    pub fn new(tag: impl Into<String>, commit: impl Into<String>) -> Self {
        let tag = tag.into();
        let version = tag.strip_prefix('v').unwrap_or(&tag).to_string();
        Self {
            tag,
            version,
            commit: commit.into(),
            date: Utc::now(),
        }
    }
}

impl Default for ReleaseInfo {
    fn default() -> Self {
        Self::new("v0.0.0-snapshot", "none")
    }
}

/// External collaborators the stages call into.
#[derive(Clone)]
pub struct Capabilities {
    builder: Arc<dyn Builder>,
    packagers: BTreeMap<String, Arc<dyn Packager>>,
    publishers: BTreeMap<String, Arc<dyn Publisher>>,
}

impl Default for Capabilities {
    fn default() -> Self {
        let mut capabilities = Self {
            builder: Arc::new(CommandBuilder),
            packagers: BTreeMap::new(),
            publishers: BTreeMap::new(),
        };
        capabilities.register_publisher(DirectoryPublisher::PROVIDER, Arc::new(DirectoryPublisher));
        capabilities
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("packagers", &self.packagers.keys().collect::<Vec<_>>())
            .field("publishers", &self.publishers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Capabilities {
    pub fn with_builder(mut self, builder: Arc<dyn Builder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn register_packager(&mut self, format: impl Into<String>, packager: Arc<dyn Packager>) {
        self.packagers.insert(format.into(), packager);
    }

    pub fn register_publisher(
        &mut self,
        provider: impl Into<String>,
        publisher: Arc<dyn Publisher>,
    ) {
        self.publishers.insert(provider.into(), publisher);
    }

    pub fn builder(&self) -> &Arc<dyn Builder> {
        &self.builder
    }

    pub fn packager(&self, format: &str) -> PipelineResult<&Arc<dyn Packager>> {
        self.packagers.get(format).ok_or_else(|| {
            PipelineError::config(format!("no packager registered for the format {format}"))
        })
    }

    pub fn publisher(&self, provider: &str) -> PipelineResult<&Arc<dyn Publisher>> {
        self.publishers.get(provider).ok_or_else(|| {
            PipelineError::config(format!(
                "no publisher registered for provider '{}'. Available providers: {}",
                provider,
                self.publisher_providers().join(", ")
            ))
        })
    }

    pub fn publisher_providers(&self) -> Vec<String> {
        self.publishers.keys().cloned().collect()
    }
}

/// Everything one release run shares between its stages. Built fresh per
/// run and dropped with it.
pub struct ReleaseContext {
    pub config: ReleaseConfig,
    pub info: ReleaseInfo,
    pub catalog: Catalog,
    pub limiter: Limiter,
    pub capabilities: Capabilities,
    events: Arc<dyn EventSink>,
}

impl ReleaseContext {
    pub fn new(config: ReleaseConfig, info: ReleaseInfo) -> Self {
        let events: Arc<dyn EventSink> = Arc::new(TracingSink);
        let limiter = Limiter::new(config.parallelism.unwrap_or_else(default_parallelism));
        Self {
            config,
            info,
            catalog: Catalog::with_events(events.clone()),
            limiter,
            capabilities: Capabilities::default(),
            events,
        }
    }

    /// Replaces the event sink. Records already in the catalog stay.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.catalog = self.catalog.with_sink(events.clone());
        self.events = events;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = Some(parallelism);
        self.limiter = Limiter::new(parallelism);
        self
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Process environment overlaid with the configured `env` entries.
    pub fn env(&self) -> PipelineResult<BTreeMap<String, String>> {
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        env.extend(parse_env(&self.config.env)?);
        Ok(env)
    }

    /// Release-wide template values, with `env` as the environment.
    pub fn template_vars_with_env(&self, env: BTreeMap<String, String>) -> TemplateVars {
        TemplateVars::new()
            .with("project", self.config.project_name.as_str())
            .with("version", self.info.version.as_str())
            .with("tag", self.info.tag.as_str())
            .with("commit", self.info.commit.as_str())
            .with("date", self.info.date.format("%Y-%m-%d").to_string())
            .with("timestamp", self.info.date.timestamp().to_string())
            .with_env(env)
    }

    pub fn template_vars(&self) -> PipelineResult<TemplateVars> {
        Ok(self.template_vars_with_env(self.env()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactKind};
    use crate::observability::MetricsCollector;
    use crate::template::render;
    #[test]
    fn version_drops_v_prefix() {
        let info = ReleaseInfo::new("v1.4.0", "abc123");
        assert_eq!(info.version, "1.4.0");
        let info = ReleaseInfo::new("2.0.0", "abc123");
        assert_eq!(info.version, "2.0.0");
    }

    #[test]
    fn template_vars_include_release_and_config_env() {
        let config = ReleaseConfig {
            project_name: "demo".into(),
            env: vec!["RELCRAFT_TEST_FLAVOUR=nightly".into()],
            ..ReleaseConfig::default()
        };
        let ctx = ReleaseContext::new(config, ReleaseInfo::new("v1.0.0", "deadbeef"));
        let vars = ctx.template_vars().unwrap();
        let rendered = render("{project}-{version}-{commit}-{env.RELCRAFT_TEST_FLAVOUR}", &vars)
            .unwrap();
        assert_eq!(rendered, "demo-1.0.0-deadbeef-nightly");
    }

    #[test]
    fn unknown_packager_is_config_error() {
        let caps = Capabilities::default();
        let err = caps.packager("nope").err().unwrap();
        assert_eq!(
            err.to_string(),
            "configuration error: no packager registered for the format nope"
        );
        assert!(caps.publisher("file").is_ok());
    }

    #[test]
    fn unknown_publisher_lists_providers() {
        let err = Capabilities::default().publisher("s3").err().unwrap();
        assert_eq!(
            err.to_string(),
            "configuration error: no publisher registered for provider 's3'. \
             Available providers: file"
        );
    }

    #[test]
    fn swapping_sinks_does_not_recount_artifacts() {
        let first = MetricsCollector::new();
        let ctx = ReleaseContext::new(ReleaseConfig::default(), ReleaseInfo::default())
            .with_events(Arc::new(first.clone()));
        ctx.catalog
            .add(Artifact::new(ArtifactKind::Binary, "app", "dist/app"));

        let second = MetricsCollector::new();
        let ctx = ctx.with_events(Arc::new(second.clone()));
        assert_eq!(ctx.catalog.len(), 1);
        assert!(second.snapshot().artifacts.is_empty());

        ctx.catalog
            .add(Artifact::new(ArtifactKind::Checksum, "sums", "dist/sums"));
        assert_eq!(second.snapshot().artifacts.get("checksum"), Some(&1));
        assert_eq!(first.snapshot().artifacts.get("binary"), Some(&1));
        assert_eq!(first.snapshot().artifacts.get("checksum"), None);
    }
}
