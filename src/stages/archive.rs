//! Bundles each platform's binaries, plus any extra files, into one archive.
//!
//! With the `binary` format no archive is written: every binary is added
//! again to the catalog as an uploadable binary, next to its build record.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;

use crate::artifact::{Artifact, ArtifactKind, EXTRA_FORMAT, EXTRA_ID, by_kind};
use crate::config::{ArchiveConfig, ReleaseConfig};
use crate::context::ReleaseContext;
use crate::error::{IoResultExt, Outcome, PipelineError, PipelineResult, ensure_parent};
use crate::group::fan_out;
use crate::pipeline::Stage;
use crate::stages::default_string;
use crate::template::{self, Scope, render};

pub const NAME: &str = "archive";
pub const BINARY_FORMAT: &str = "binary";
pub const DEFAULT_FORMAT: &str = "tar.gz";
pub const DEFAULT_NAME_TEMPLATE: &str = "{binary}_{version}_{os}_{arch}{armv}";
pub const SUPPORTED_FORMATS: &[&str] = &["tar.gz", "tgz", "tar", "zip", BINARY_FORMAT];

/// Files picked up next to the binaries when none are configured.
pub const DEFAULT_FILES: &[&str] = &[
    "licence*",
    "LICENCE*",
    "license*",
    "LICENSE*",
    "readme*",
    "README*",
    "changelog*",
    "CHANGELOG*",
];

/// Streams files into an archive on disk.
pub trait ArchiveWriter {
    /// Adds the regular file at `path` under `name`.
    fn add(&mut self, name: &str, path: &Path) -> PipelineResult<()>;
    /// Flushes and closes the archive.
    fn finish(self: Box<Self>) -> PipelineResult<()>;
}

/// Writer for `format`, or a configuration error if there is none.
pub fn writer_for(format: &str, file: File) -> PipelineResult<Box<dyn ArchiveWriter>> {
    match format {
        "tar.gz" | "tgz" => Ok(Box::new(TarWriter {
            builder: tar::Builder::new(GzEncoder::new(file, Compression::default())),
        })),
        "tar" => Ok(Box::new(TarWriter {
            builder: tar::Builder::new(file),
        })),
        "zip" => Ok(Box::new(ZipArchiveWriter {
            writer: zip::ZipWriter::new(file),
        })),
        other => Err(PipelineError::config(format!(
            "unsupported archive format '{other}'"
        ))),
    }
}

fn regular_file(path: &Path) -> PipelineResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::io_at(
            "add to archive",
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ))
    }
}

/// Gzip needs its trailer written after the tar footer.
trait Finish {
    fn finish_stream(self) -> io::Result<()>;
}

impl Finish for File {
    fn finish_stream(self) -> io::Result<()> {
        self.sync_all()
    }
}

impl Finish for GzEncoder<File> {
    fn finish_stream(self) -> io::Result<()> {
        self.finish()?.sync_all()
    }
}

struct TarWriter<W: io::Write + Finish> {
    builder: tar::Builder<W>,
}

impl<W: io::Write + Finish> ArchiveWriter for TarWriter<W> {
    fn add(&mut self, name: &str, path: &Path) -> PipelineResult<()> {
        regular_file(path)?;
        self.builder
            .append_path_with_name(path, name)
            .at("add to archive", path)
    }

    fn finish(self: Box<Self>) -> PipelineResult<()> {
        let stream = self
            .builder
            .into_inner()
            .map_err(|err| PipelineError::io("failed to finish tar archive", err))?;
        stream
            .finish_stream()
            .map_err(|err| PipelineError::io("failed to finish tar archive", err))
    }
}

struct ZipArchiveWriter {
    writer: zip::ZipWriter<File>,
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add(&mut self, name: &str, path: &Path) -> PipelineResult<()> {
        regular_file(path)?;
        let options = SimpleFileOptions::default().unix_permissions(file_mode(path));
        self.writer
            .start_file(name, options)
            .map_err(|err| PipelineError::io_at("add to archive", path, io::Error::other(err)))?;
        let mut source = File::open(path).at("open", path)?;
        io::copy(&mut source, &mut self.writer).at("add to archive", path)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> PipelineResult<()> {
        self.writer
            .finish()
            .map_err(|err| PipelineError::io("failed to finish zip archive", io::Error::other(err)))?
            .sync_all()
            .map_err(|err| PipelineError::io("failed to finish zip archive", err))
    }
}

#[cfg(unix)]
fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> u32 {
    0o755
}

/// Expands `patterns` into a sorted, de-duplicated file list. A pattern
/// matching a directory is an error.
pub fn find_files(patterns: &[String]) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let entries = glob::glob(pattern).map_err(|err| PipelineError::Glob {
            pattern: pattern.clone(),
            message: err.to_string(),
        })?;
        for entry in entries {
            let path = entry.map_err(|err| PipelineError::Glob {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
            if path.is_dir() {
                return Err(PipelineError::Glob {
                    pattern: pattern.clone(),
                    message: format!("{} is a directory", path.display()),
                });
            }
            files.push(path);
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Name an extra file gets inside the archive. Relative matches keep their
/// directories minus any `.` or `..`; absolute ones keep only the file name.
fn entry_name(path: &Path) -> String {
    if path.is_relative() {
        let kept: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        if !kept.as_os_str().is_empty() {
            return kept.to_string_lossy().replace('\\', "/");
        }
    }
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct ArchiveStage;

impl Stage for ArchiveStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn defaults(&self, config: &mut ReleaseConfig) -> PipelineResult<()> {
        let archive = &mut config.archive;
        default_string(&mut archive.format, DEFAULT_FORMAT);
        default_string(&mut archive.name_template, DEFAULT_NAME_TEMPLATE);
        if archive.files.is_empty() {
            archive.files = DEFAULT_FILES.iter().map(|f| f.to_string()).collect();
        }
        for format in std::iter::once(&archive.format)
            .chain(archive.format_overrides.iter().map(|o| &o.format))
        {
            if !SUPPORTED_FORMATS.contains(&format.as_str()) {
                return Err(PipelineError::config(format!(
                    "unsupported archive format '{format}'"
                )));
            }
        }
        template::check(&archive.name_template, Scope::Artifact)
    }

    fn run(&self, ctx: &ReleaseContext) -> PipelineResult<Outcome> {
        let binaries = ctx.catalog.filter(&by_kind(ArtifactKind::Binary));
        if binaries.is_empty() {
            return Ok(Outcome::skip("no binaries to archive"));
        }
        let config = &ctx.config.archive;
        fan_out(
            &ctx.limiter,
            binaries.group_by_platform().into_values(),
            |group| {
                let format = config.format_for(&group[0].os);
                if format == BINARY_FORMAT {
                    add_uploadable_binaries(ctx, config, &group)
                } else {
                    create_archive(ctx, config, format, &group)
                }
            },
        )?;
        Ok(Outcome::Completed)
    }
}

fn create_archive(
    ctx: &ReleaseContext,
    config: &ArchiveConfig,
    format: &str,
    binaries: &[Arc<Artifact>],
) -> PipelineResult<()> {
    let first = &binaries[0];
    let vars = ctx.template_vars()?.with_artifact(first).with("format", format);
    let folder = render(&config.name_template, &vars)?;
    let name = format!("{folder}.{format}");
    let path = ctx.config.dist.join(&name);
    let entry = |name: &str| {
        if config.wrap_in_directory {
            format!("{folder}/{name}")
        } else {
            name.to_string()
        }
    };

    info!(archive = %path.display(), "Creating archive");
    ensure_parent(&path)?;
    let file = File::create(&path).at("create", &path)?;
    let mut writer = writer_for(format, file)?;
    for extra in find_files(&config.files)? {
        let name = entry_name(&extra);
        debug!(file = %extra.display(), "Adding file");
        writer.add(&entry(&name), &extra)?;
    }
    for binary in binaries {
        writer.add(&entry(&binary.name), &binary.path)?;
    }
    writer.finish()?;

    let mut archive = Artifact::new(ArtifactKind::UploadableArchive, name, path)
        .with_platform(&first.os, &first.arch, &first.arm, &first.mips)
        .with_extra(EXTRA_FORMAT, format);
    if let Some(id) = first.id()
        && binaries.iter().all(|b| b.id() == Some(id))
    {
        archive = archive.with_extra(EXTRA_ID, id);
    }
    ctx.catalog.add(archive);
    Ok(())
}

fn add_uploadable_binaries(
    ctx: &ReleaseContext,
    config: &ArchiveConfig,
    binaries: &[Arc<Artifact>],
) -> PipelineResult<()> {
    let base = ctx.template_vars()?;
    for binary in binaries {
        let vars = base.clone().with_artifact(binary).with("format", BINARY_FORMAT);
        let suffix = if binary.os == "windows" { ".exe" } else { "" };
        let name = format!("{}{suffix}", render(&config.name_template, &vars)?);
        info!(binary = %binary.path.display(), name, "Skipping archive");
        let mut uploadable = binary.retyped(ArtifactKind::UploadableBinary);
        uploadable.name = name;
        ctx.catalog.add(uploadable);
    }
    Ok(())
}
