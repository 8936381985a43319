use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use relcraft::artifact::{Artifact, ArtifactKind, ChecksumAlgorithm};
use relcraft::config::{DEFAULT_CONFIG_FILE, ReleaseConfig};
use relcraft::context::{ReleaseContext, ReleaseInfo};
use relcraft::init::generate_config;
use relcraft::observability::{CompositeSink, MetricsCollector, TracingSink, log_snapshot};
use relcraft::pipeline::{StageRegistry, build_pipeline};
use relcraft::stages;
use relcraft::validation::validate_config;
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Release(args) => release(args),
        Commands::Check { configs } => check_configs(&configs),
        Commands::ListStages => {
            list_stages();
            Ok(())
        }
        Commands::Init {
            starter,
            project,
            output,
            force,
        } => {
            let project = match project {
                Some(project) => project,
                None => current_dir_name()?,
            };
            let generated = generate_config(&starter, &project, &output, force)?;
            info!(
                starter = %starter,
                path = %generated.display(),
                "Starter config generated"
            );
            Ok(())
        }
        Commands::Digest {
            path,
            algorithm,
            output,
        } => digest(&path, &algorithm, output.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "relcraft", &mut io::stdout());
            Ok(())
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))
}

fn release(args: ReleaseArgs) -> Result<()> {
    let mut config = ReleaseConfig::load(&args.config)?;
    if let Some(parallelism) = args.parallelism {
        config.parallelism = Some(parallelism);
    }
    if args.rm_dist {
        config.rm_dist = true;
    }

    let registry = build_registry();
    let mut orchestrator = build_pipeline(&registry, &config.stage_names(), args.skip_publish)?;

    let info = match &args.tag {
        Some(tag) => ReleaseInfo::new(tag.as_str(), args.commit.as_deref().unwrap_or("none")),
        None => ReleaseInfo::default(),
    };
    let metrics = MetricsCollector::new();
    let events = CompositeSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(metrics.clone()));
    let mut ctx = ReleaseContext::new(config, info).with_events(Arc::new(events));

    let outcome = orchestrator.run(&mut ctx);
    write_metrics(&metrics, &args)?;

    match outcome {
        Ok(summary) => {
            for report in summary.skipped() {
                info!(stage = report.stage, "Skipped");
            }
            info!(
                artifacts = ctx.catalog.len(),
                duration_ms = summary.duration.as_secs_f64() * 1_000.0,
                "Release succeeded"
            );
            Ok(())
        }
        Err(err) => {
            let stage = orchestrator.failed_stage().unwrap_or("unknown");
            error!(stage, "{err}");
            Err(anyhow::Error::new(err).context(format!("release failed in stage '{stage}'")))
        }
    }
}

fn write_metrics(metrics: &MetricsCollector, args: &ReleaseArgs) -> Result<()> {
    if !args.print_metrics && args.metrics_json.is_none() && args.metrics_prometheus.is_none() {
        return Ok(());
    }
    let snapshot = metrics.snapshot();
    if args.print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = &args.metrics_json {
        create_parent(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = &args.metrics_prometheus {
        create_parent(path)?;
        std::fs::write(path, snapshot.to_prometheus())
            .with_context(|| format!("Failed to write Prometheus metrics: {}", path.display()))?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn check_configs(configs: &[PathBuf]) -> Result<()> {
    let registry = build_registry();
    let mut failures = 0usize;

    for path in configs {
        match ReleaseConfig::load(path) {
            Ok(config) => {
                let report = validate_config(&config, &registry);
                for warning in &report.warnings {
                    warn!(file = %path.display(), "{warning}");
                }
                if report.is_ok() {
                    info!(file = %path.display(), "Config check passed");
                } else {
                    failures += 1;
                    for error_msg in &report.errors {
                        error!(file = %path.display(), "{error_msg}");
                    }
                }
            }
            Err(err) => {
                failures += 1;
                error!(file = %path.display(), "Failed to load config: {err:#}");
            }
        }
    }

    if failures > 0 {
        bail!("Config check failed for {failures} file(s)");
    }
    println!("config is valid");
    Ok(())
}

fn list_stages() {
    let registry = build_registry();
    println!("Available stages:");
    for name in registry.known_stages() {
        println!("- {name}");
    }
}

fn digest(path: &Path, algorithm: &str, output: Option<&Path>) -> Result<()> {
    let algorithm: ChecksumAlgorithm = algorithm.parse()?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let digest = Artifact::new(ArtifactKind::Checksum, name, path).digest(algorithm)?;
    let line = format!("{}  {}", digest, path.display());
    println!("{line}");
    if let Some(output) = output {
        create_parent(output)?;
        std::fs::write(output, format!("{line}\n"))
            .with_context(|| format!("Failed to write digest: {}", output.display()))?;
        info!(
            file = %path.display(),
            digest_output = %output.display(),
            algorithm = algorithm.as_str(),
            "Digest written"
        );
    }
    Ok(())
}

fn current_dir_name() -> Result<String> {
    let dir = std::env::current_dir().context("Failed to determine current directory")?;
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("Cannot derive a project name from {}", dir.display()))
}

fn build_registry() -> StageRegistry {
    stages::default_registry()
}

#[derive(Parser)]
#[command(
    name = "relcraft",
    version,
    about = "Release pipeline: build, archive, package, checksum and publish"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the release pipeline.
    Release(ReleaseArgs),
    /// Validate configuration files without running anything.
    Check {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        configs: Vec<PathBuf>,
    },
    ListStages,
    /// Write a starter configuration.
    Init {
        #[arg(long, default_value = "cargo")]
        starter: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Print the checksum of a file.
    Digest {
        path: PathBuf,
        #[arg(long, default_value = "sha256")]
        algorithm: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct ReleaseArgs {
    #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    parallelism: Option<usize>,
    #[arg(long)]
    skip_publish: bool,
    #[arg(long)]
    rm_dist: bool,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long, requires = "tag")]
    commit: Option<String>,
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
    #[arg(long = "metrics-prometheus")]
    metrics_prometheus: Option<PathBuf>,
}
