#![cfg(unix)]

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use relcraft::artifact::{Artifact, ArtifactKind, by_kind};
use relcraft::config::ReleaseConfig;
use relcraft::context::{Capabilities, ReleaseContext, ReleaseInfo};
use relcraft::pipeline::build_pipeline;
use relcraft::stages::default_registry;
use relcraft::stages::package::{PackageRequest, Packager};
use relcraft::stages::publish::{Destination, Publisher};
use relcraft::{PipelineError, PipelineResult};
use tempfile::tempdir;

/// Writes a manifest of the request instead of a real package.
struct ManifestPackager;

impl Packager for ManifestPackager {
    fn package(&self, request: &PackageRequest<'_>, output: &Path) -> PipelineResult<()> {
        let mut manifest = format!(
            "{} {} {}/{}\n",
            request.name, request.version, request.os, request.arch
        );
        for content in &request.contents {
            manifest.push_str(&format!(
                "{} -> {}\n",
                content.source.display(),
                content.destination
            ));
        }
        fs::write(output, manifest).map_err(|err| PipelineError::io("write package", err))
    }
}

/// Remembers what it was asked to upload.
#[derive(Default)]
struct RecordingPublisher {
    uploads: Mutex<Vec<(String, String)>>,
}

impl Publisher for RecordingPublisher {
    fn publish(&self, artifact: &Artifact, destination: &Destination) -> PipelineResult<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((destination.folder.clone(), artifact.name.clone()));
        Ok(())
    }
}

fn write_config(root: &Path) -> ReleaseConfig {
    fs::write(root.join("README.md"), "# demo\n").unwrap();
    let yaml = format!(
        r#"
project_name: demo
dist: "{root}/dist"
parallelism: 2
env:
  - RELEASE_CHANNEL=stable
before:
  hooks:
    - "touch {root}/before-{{env.RELEASE_CHANNEL}}"
builds:
  - binary: demo
    command: "touch {{output}}"
    targets: [linux_amd64, windows_amd64]
archive:
  files: ["{root}/README*"]
  format_overrides:
    - os: windows
      format: zip
packages:
  formats: [deb]
  maintainer: Release Team <release@example.com>
publish:
  - provider: file
    bucket: "{root}/bucket"
  - provider: recording
    bucket: unused
    folder: "uploads/{{version}}"
"#,
        root = root.display()
    );
    ReleaseConfig::from_yaml(&yaml).unwrap()
}

#[test]
fn full_release_produces_and_publishes_everything() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    let config = write_config(root);

    let recorder = Arc::new(RecordingPublisher::default());
    let mut capabilities = Capabilities::default();
    capabilities.register_packager("deb", Arc::new(ManifestPackager));
    capabilities.register_publisher("recording", recorder.clone());

    let registry = default_registry();
    let mut orchestrator = build_pipeline(&registry, &config.stage_names(), false).unwrap();
    let mut ctx = ReleaseContext::new(config, ReleaseInfo::new("v1.2.0", "0badc0de"))
        .with_capabilities(capabilities);

    let summary = orchestrator.run(&mut ctx).unwrap();
    assert!(summary.skipped().next().is_none());

    let dist = root.join("dist");
    assert!(root.join("before-stable").exists());
    assert!(dist.join("config.yaml").is_file());
    assert!(dist.join("demo_linux_amd64/demo").is_file());
    assert!(dist.join("demo_windows_amd64/demo.exe").is_file());
    assert!(dist.join("demo_1.2.0_linux_amd64.tar.gz").is_file());
    assert!(dist.join("demo_1.2.0_windows_amd64.zip").is_file());

    let package = fs::read_to_string(dist.join("demo_1.2.0_linux_amd64.deb")).unwrap();
    assert!(package.starts_with("demo 1.2.0 linux/amd64"));
    assert!(package.contains("-> /usr/local/bin/demo"));

    let checksums = fs::read_to_string(dist.join("demo_1.2.0_checksums.txt")).unwrap();
    let summed: Vec<_> = checksums
        .lines()
        .map(|l| l.split_once("  ").unwrap().1)
        .collect();
    assert_eq!(
        summed,
        vec![
            "demo_1.2.0_linux_amd64.deb",
            "demo_1.2.0_linux_amd64.tar.gz",
            "demo_1.2.0_windows_amd64.zip"
        ]
    );

    let published: BTreeSet<_> = fs::read_dir(root.join("bucket/demo/v1.2.0"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        published,
        BTreeSet::from([
            "demo_1.2.0_checksums.txt".to_string(),
            "demo_1.2.0_linux_amd64.deb".to_string(),
            "demo_1.2.0_linux_amd64.tar.gz".to_string(),
            "demo_1.2.0_windows_amd64.zip".to_string(),
        ])
    );

    let uploads = recorder.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 4);
    assert!(uploads.iter().all(|(folder, _)| folder == "uploads/1.2.0"));

    assert_eq!(ctx.catalog.filter(&by_kind(ArtifactKind::Binary)).len(), 2);
    assert_eq!(ctx.catalog.filter(&by_kind(ArtifactKind::Checksum)).len(), 1);
}

#[test]
fn unregistered_packager_fails_before_packaging() {
    let temp = tempdir().unwrap();
    let mut config = write_config(temp.path());
    config.publish.clear();
    config.packages.formats = vec!["nope".into()];

    let registry = default_registry();
    let mut orchestrator = build_pipeline(&registry, &config.stage_names(), false).unwrap();
    let mut ctx = ReleaseContext::new(config, ReleaseInfo::new("v1.2.0", "abc"));

    let err = orchestrator.run(&mut ctx).unwrap_err();

    assert_eq!(
        err.to_string(),
        "configuration error: no packager registered for the format nope"
    );
    assert_eq!(orchestrator.failed_stage(), Some("package"));
    assert!(ctx.catalog.filter(&by_kind(ArtifactKind::LinuxPackage)).is_empty());
    assert!(!temp.path().join("dist/demo_1.2.0_checksums.txt").exists());
}

#[test]
fn failed_build_stops_the_release() {
    let temp = tempdir().unwrap();
    let mut config = write_config(temp.path());
    config.builds[0].command = "false".into();

    let registry = default_registry();
    let mut orchestrator = build_pipeline(&registry, &config.stage_names(), true).unwrap();
    let mut ctx = ReleaseContext::new(config, ReleaseInfo::new("v1.2.0", "abc"));

    let err = orchestrator.run(&mut ctx).unwrap_err();

    assert!(matches!(err, PipelineError::Build { .. }), "{err:?}");
    assert_eq!(orchestrator.failed_stage(), Some("build"));
    assert!(!temp.path().join("dist/demo_1.2.0_linux_amd64.tar.gz").exists());
}

#[test]
fn non_empty_dist_requires_rm_dist() {
    let temp = tempdir().unwrap();
    let mut config = write_config(temp.path());
    config.publish.clear();
    config.packages.formats.clear();
    fs::create_dir_all(temp.path().join("dist")).unwrap();
    fs::write(temp.path().join("dist/leftover"), "old").unwrap();

    let registry = default_registry();
    let names = config.stage_names();

    let mut orchestrator = build_pipeline(&registry, &names, false).unwrap();
    let mut ctx = ReleaseContext::new(config.clone(), ReleaseInfo::default());
    assert!(orchestrator.run(&mut ctx).is_err());
    assert_eq!(orchestrator.failed_stage(), Some("dist"));

    config.rm_dist = true;
    let mut orchestrator = build_pipeline(&registry, &names, false).unwrap();
    let mut ctx = ReleaseContext::new(config, ReleaseInfo::default());
    orchestrator.run(&mut ctx).unwrap();
    assert!(!temp.path().join("dist/leftover").exists());
}

#[test]
fn misplaced_placeholder_fails_before_any_hook_runs() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("pre-hook-ran");
    let yaml = format!(
        r#"
project_name: demo
dist: "{root}/dist"
pipeline: [dist, build, archive, checksum]
builds:
  - binary: demo
    command: "touch {{output}}"
    targets: [linux_amd64]
    hooks:
      pre: "touch {marker}"
checksum:
  name_template: "{{os}}_checksums.txt"
"#,
        root = temp.path().display(),
        marker = marker.display()
    );
    let config = ReleaseConfig::from_yaml(&yaml).unwrap();

    let report = relcraft::validation::validate_config(&config, &default_registry());
    assert!(!report.is_ok());
    assert!(
        report.errors.iter().any(|e| e.contains("'os' is not available")),
        "{:?}",
        report.errors
    );

    let registry = default_registry();
    let mut orchestrator = build_pipeline(&registry, &config.stage_names(), false).unwrap();
    let mut ctx = ReleaseContext::new(config, ReleaseInfo::new("v1.0.0", "abc"));
    let err = orchestrator.run(&mut ctx).unwrap_err();

    assert!(matches!(err, PipelineError::Template { .. }), "{err:?}");
    assert_eq!(orchestrator.failed_stage(), Some("checksum"));
    assert!(!marker.exists());
}
