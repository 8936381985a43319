use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use relcraft::artifact::{
    Artifact, ArtifactKind, EXTRA_BINARY, EXTRA_FORMAT, EXTRA_ID, by_kind,
};
use relcraft::config::{FormatOverride, ReleaseConfig};
use relcraft::context::{ReleaseContext, ReleaseInfo};
use relcraft::pipeline::Stage;
use relcraft::stages::archive::ArchiveStage;
use relcraft::{Outcome, PipelineError};
use tempfile::tempdir;

fn context(dist: &Path, configure: impl FnOnce(&mut ReleaseConfig)) -> ReleaseContext {
    let mut config = ReleaseConfig {
        project_name: "demo".into(),
        dist: dist.to_path_buf(),
        ..ReleaseConfig::default()
    };
    configure(&mut config);
    ArchiveStage.defaults(&mut config).expect("archive defaults");
    ReleaseContext::new(config, ReleaseInfo::new("v1.0.0", "abc123"))
}

fn add_binary(ctx: &ReleaseContext, dist: &Path, binary: &str, os: &str, arch: &str) {
    let suffix = if os == "windows" { ".exe" } else { "" };
    let folder = dist.join(format!("{binary}_{os}_{arch}"));
    fs::create_dir_all(&folder).unwrap();
    let path = folder.join(format!("{binary}{suffix}"));
    fs::write(&path, format!("#!{binary} for {os}/{arch}")).unwrap();
    ctx.catalog.add(
        Artifact::new(ArtifactKind::Binary, format!("{binary}{suffix}"), path)
            .with_platform(os, arch, "", "")
            .with_extra(EXTRA_ID, binary)
            .with_extra(EXTRA_BINARY, binary),
    );
}

fn tar_gz_entries(path: &Path) -> BTreeSet<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    archive
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap().path().unwrap().display().to_string())
        .collect()
}

#[test]
fn binary_format_adds_uploadable_binaries_without_archiving() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path(), |config| {
        config.archive.format = "binary".into();
    });
    add_binary(&ctx, temp.path(), "cli", "linux", "amd64");
    add_binary(&ctx, temp.path(), "daemon", "linux", "amd64");
    assert_eq!(ctx.catalog.len(), 2);

    let outcome = ArchiveStage.run(&ctx).unwrap();
    assert_eq!(outcome, Outcome::Completed);

    assert_eq!(ctx.catalog.len(), 4);
    let uploadable = ctx.catalog.filter(&by_kind(ArtifactKind::UploadableBinary));
    assert_eq!(uploadable.len(), 2);
    // Build records stay next to the uploadable ones.
    assert_eq!(ctx.catalog.filter(&by_kind(ArtifactKind::Binary)).len(), 2);
    assert!(ctx.catalog.filter(&by_kind(ArtifactKind::UploadableArchive)).is_empty());

    let names: BTreeSet<_> = uploadable.list().iter().map(|a| a.name.clone()).collect();
    assert_eq!(
        names,
        BTreeSet::from([
            "cli_1.0.0_linux_amd64".to_string(),
            "daemon_1.0.0_linux_amd64".to_string()
        ])
    );
    for artifact in uploadable.list() {
        assert!(artifact.path.is_file());
    }

    let archives: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().is_file())
        .collect();
    assert!(archives.is_empty(), "no archive file should be written");
}

#[test]
fn tar_gz_holds_binaries_and_extra_files() {
    let temp = tempdir().unwrap();
    let docs = tempdir().unwrap();
    fs::write(docs.path().join("README.md"), "# demo").unwrap();
    fs::write(docs.path().join("LICENSE"), "MIT").unwrap();

    let pattern_root = docs.path().display().to_string();
    let ctx = context(temp.path(), |config| {
        config.archive.files = vec![
            format!("{pattern_root}/README*"),
            format!("{pattern_root}/LICENSE*"),
        ];
    });
    add_binary(&ctx, temp.path(), "demo", "linux", "amd64");

    ArchiveStage.run(&ctx).unwrap();

    let archives = ctx.catalog.filter(&by_kind(ArtifactKind::UploadableArchive));
    assert_eq!(archives.len(), 1);
    let archive = &archives.list()[0];
    assert_eq!(archive.name, "demo_1.0.0_linux_amd64.tar.gz");
    assert_eq!(archive.format(), Some("tar.gz"));
    assert_eq!(archive.id(), Some("demo"));
    assert_eq!(archive.os, "linux");

    let entries = tar_gz_entries(&archive.path);
    assert_eq!(
        entries,
        BTreeSet::from(["LICENSE".to_string(), "README.md".to_string(), "demo".to_string()])
    );
}

#[test]
fn wrap_in_directory_prefixes_entries() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path(), |config| {
        config.archive.wrap_in_directory = true;
        config.archive.files = vec![];
    });
    add_binary(&ctx, temp.path(), "demo", "darwin", "arm64");

    ArchiveStage.run(&ctx).unwrap();

    let entries = tar_gz_entries(&temp.path().join("demo_1.0.0_darwin_arm64.tar.gz"));
    assert!(entries.contains("demo_1.0.0_darwin_arm64/demo"));
}

#[test]
fn windows_override_produces_zip() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path(), |config| {
        config.archive.format_overrides = vec![FormatOverride {
            os: "windows".into(),
            format: "zip".into(),
        }];
    });
    add_binary(&ctx, temp.path(), "demo", "windows", "amd64");
    add_binary(&ctx, temp.path(), "demo", "linux", "amd64");

    ArchiveStage.run(&ctx).unwrap();

    let archives = ctx.catalog.filter(&by_kind(ArtifactKind::UploadableArchive));
    let formats: BTreeSet<_> = archives
        .list()
        .iter()
        .map(|a| a.extra_str(EXTRA_FORMAT).unwrap().to_string())
        .collect();
    assert_eq!(
        formats,
        BTreeSet::from(["tar.gz".to_string(), "zip".to_string()])
    );

    let zip_path = temp.path().join("demo_1.0.0_windows_amd64.zip");
    let mut zip = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
    let mut content = String::new();
    zip.by_name("demo.exe")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "#!demo for windows/amd64");
}

#[test]
fn missing_binary_fails_the_stage() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path(), |_| {});
    ctx.catalog.add(
        Artifact::new(
            ArtifactKind::Binary,
            "ghost",
            temp.path().join("nowhere/ghost"),
        )
        .with_platform("linux", "amd64", "", ""),
    );

    let err = ArchiveStage.run(&ctx).unwrap_err();
    assert!(matches!(err, PipelineError::Io { .. }), "{err:?}");
}

#[test]
fn nothing_to_archive_is_a_skip() {
    let temp = tempdir().unwrap();
    let ctx = context(temp.path(), |_| {});
    assert!(ArchiveStage.run(&ctx).unwrap().is_skipped());
}
