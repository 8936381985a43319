//! Catalog of every file a release run produces.
//!
//! Stages append [`Artifact`] records as they finish producing files and
//! select the ones they care about through composable [`Filter`]s. Records
//! are shared behind `Arc`, so filtered views hold the same records as the
//! catalog they came from.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::{IoResultExt, PipelineError, PipelineResult};
use crate::observability::{EventSink, NullSink, PipelineEvent};

/// Extra key holding the archive or package format of a record.
pub const EXTRA_FORMAT: &str = "Format";
/// Extra key holding the id of the build that owns a record.
pub const EXTRA_ID: &str = "ID";
/// Extra key holding the binary name a record was built from.
pub const EXTRA_BINARY: &str = "Binary";

pub type Extra = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A compressed archive ready to upload.
    UploadableArchive,
    /// A raw binary ready to upload, produced when archiving is skipped.
    UploadableBinary,
    /// Output of a build.
    Binary,
    /// An OS package produced by a packager.
    LinuxPackage,
    /// A container image yet to be pushed.
    PublishableContainerImage,
    /// A pushed container image.
    ContainerImage,
    /// A checksums file.
    Checksum,
    /// A signature file.
    Signature,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 8] = [
        ArtifactKind::UploadableArchive,
        ArtifactKind::UploadableBinary,
        ArtifactKind::Binary,
        ArtifactKind::LinuxPackage,
        ArtifactKind::PublishableContainerImage,
        ArtifactKind::ContainerImage,
        ArtifactKind::Checksum,
        ArtifactKind::Signature,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadableArchive => "uploadable_archive",
            Self::UploadableBinary => "uploadable_binary",
            Self::Binary => "binary",
            Self::LinuxPackage => "linux_package",
            Self::PublishableContainerImage => "publishable_container_image",
            Self::ContainerImage => "container_image",
            Self::Checksum => "checksum",
            Self::Signature => "signature",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::UploadableArchive => "Archive",
            Self::UploadableBinary | Self::Binary => "Binary",
            Self::LinuxPackage => "Linux Package",
            Self::PublishableContainerImage | Self::ContainerImage => "Container Image",
            Self::Checksum => "Checksum",
            Self::Signature => "Signature",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One produced file plus its classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub os: String,
    pub arch: String,
    pub arm: String,
    pub mips: String,
    pub kind: ArtifactKind,
    pub extra: Extra,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            os: String::new(),
            arch: String::new(),
            arm: String::new(),
            mips: String::new(),
            kind,
            extra: Extra::new(),
        }
    }

    pub fn with_platform(mut self, os: &str, arch: &str, arm: &str, mips: &str) -> Self {
        self.os = os.to_string();
        self.arch = arch.to_string();
        self.arm = arm.to_string();
        self.mips = mips.to_string();
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Copy of this record with another kind. Stored records are never
    /// mutated, so retyping always goes through a new record.
    pub fn retyped(&self, kind: ArtifactKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Grouping key: os, arch and arm concatenated.
    pub fn platform(&self) -> String {
        format!("{}{}{}", self.os, self.arch, self.arm)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.extra_str(EXTRA_ID)
    }

    pub fn format(&self) -> Option<&str> {
        self.extra_str(EXTRA_FORMAT)
    }

    /// Hex digest of the file at `path`.
    pub fn digest(&self, algorithm: ChecksumAlgorithm) -> PipelineResult<String> {
        let file = File::open(&self.path).at("open for checksum", &self.path)?;
        let reader = BufReader::new(file);
        let digest = match algorithm {
            ChecksumAlgorithm::Sha224 => hash_reader::<Sha224, _>(reader),
            ChecksumAlgorithm::Sha256 => hash_reader::<Sha256, _>(reader),
            ChecksumAlgorithm::Sha384 => hash_reader::<Sha384, _>(reader),
            ChecksumAlgorithm::Sha512 => hash_reader::<Sha512, _>(reader),
        };
        digest.at("read for checksum", &self.path)
    }
}

fn hash_reader<D: Digest, R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(PipelineError::config(format!(
                "invalid checksum algorithm: {other}"
            ))),
        }
    }
}

/// Predicate over artifacts. Cheap to clone.
#[derive(Clone)]
pub struct Filter(Arc<dyn Fn(&Artifact) -> bool + Send + Sync>);

impl Filter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Artifact) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn matches(&self, artifact: &Artifact) -> bool {
        (self.0)(artifact)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter(..)")
    }
}

pub fn by_os(os: &str) -> Filter {
    let os = os.to_string();
    Filter::new(move |a| a.os == os)
}

pub fn by_arch(arch: &str) -> Filter {
    let arch = arch.to_string();
    Filter::new(move |a| a.arch == arch)
}

pub fn by_arm(arm: &str) -> Filter {
    let arm = arm.to_string();
    Filter::new(move |a| a.arm == arm)
}

pub fn by_kind(kind: ArtifactKind) -> Filter {
    Filter::new(move |a| a.kind == kind)
}

pub fn by_kinds(kinds: &[ArtifactKind]) -> Filter {
    or(kinds.iter().copied().map(by_kind).collect())
}

pub fn by_format(format: &str) -> Filter {
    let format = format.to_string();
    Filter::new(move |a| a.format() == Some(format.as_str()))
}

pub fn by_formats<S: AsRef<str>>(formats: &[S]) -> Filter {
    or(formats.iter().map(|f| by_format(f.as_ref())).collect())
}

/// Matches records owned by build `id`. Checksums files belong to every
/// build of a release, so they always match.
pub fn by_id(id: &str) -> Filter {
    let id = id.to_string();
    Filter::new(move |a| a.kind == ArtifactKind::Checksum || a.id() == Some(id.as_str()))
}

pub fn by_ids<S: AsRef<str>>(ids: &[S]) -> Filter {
    or(ids.iter().map(|id| by_id(id.as_ref())).collect())
}

/// True iff every filter matches. An empty list matches everything.
pub fn and(filters: Vec<Filter>) -> Filter {
    Filter::new(move |a| filters.iter().all(|f| f.matches(a)))
}

/// True iff at least one filter matches. An empty list matches nothing.
pub fn or(filters: Vec<Filter>) -> Filter {
    Filter::new(move |a| filters.iter().any(|f| f.matches(a)))
}

/// Thread-safe, append-only list of artifacts. Clones are handles to the
/// same storage.
#[derive(Clone)]
pub struct Catalog {
    items: Arc<Mutex<Vec<Arc<Artifact>>>>,
    events: Arc<dyn EventSink>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("items", &self.lock().len())
            .finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::with_events(Arc::new(NullSink))
    }

    pub fn with_events(events: Arc<dyn EventSink>) -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    /// Copy of this catalog that reports future additions to `events`.
    /// Records already present are not announced again.
    pub fn with_sink(&self, events: Arc<dyn EventSink>) -> Catalog {
        Catalog {
            items: Arc::new(Mutex::new(self.list())),
            events,
        }
    }

    // A poisoned lock only means some task panicked mid-push; the vector
    // itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Artifact>>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, artifact: Artifact) {
        let artifact = Arc::new(artifact);
        self.events.emit(&PipelineEvent::ArtifactAdded {
            name: &artifact.name,
            path: &artifact.path,
            kind: artifact.kind,
        });
        self.lock().push(artifact);
    }

    /// Snapshot of every record in insertion order.
    pub fn list(&self) -> Vec<Arc<Artifact>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// New catalog holding the matching records, in source order.
    pub fn filter(&self, filter: &Filter) -> Catalog {
        let items = self
            .lock()
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        Catalog {
            items: Arc::new(Mutex::new(items)),
            events: self.events.clone(),
        }
    }

    pub fn group_by_platform(&self) -> BTreeMap<String, Vec<Arc<Artifact>>> {
        let mut groups: BTreeMap<String, Vec<Arc<Artifact>>> = BTreeMap::new();
        for artifact in self.lock().iter() {
            groups
                .entry(artifact.platform())
                .or_default()
                .push(artifact.clone());
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(name: &str, os: &str, arch: &str) -> Artifact {
        Artifact::new(ArtifactKind::Binary, name, format!("dist/{name}"))
            .with_platform(os, arch, "", "")
    }

    #[test]
    fn and_or_identities() {
        let artifact = binary("app", "linux", "amd64");
        assert!(and(vec![]).matches(&artifact));
        assert!(!or(vec![]).matches(&artifact));

        let yes = by_os("linux");
        let no = by_os("darwin");
        assert!(or(vec![no.clone(), yes.clone()]).matches(&artifact));
        assert!(!and(vec![yes.clone(), no.clone()]).matches(&artifact));
        assert!(and(vec![yes, by_arch("amd64")]).matches(&artifact));
    }

    #[test]
    fn filter_preserves_source_order() {
        let catalog = Catalog::new();
        for (idx, os) in ["linux", "darwin", "linux", "windows", "linux"]
            .iter()
            .enumerate()
        {
            catalog.add(binary(&format!("bin{idx}"), os, "amd64"));
        }

        let linux = catalog.filter(&by_os("linux"));
        let names: Vec<_> = linux.list().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["bin0", "bin2", "bin4"]);
        assert_eq!(catalog.len(), 5);
    }

    #[test]
    fn arm_filter_selects_one_variant() {
        let catalog = Catalog::new();
        for arm in ["6", "7"] {
            catalog.add(
                Artifact::new(ArtifactKind::Binary, format!("app_v{arm}"), "dist/app")
                    .with_platform("linux", "arm", arm, ""),
            );
        }
        catalog.add(binary("app", "linux", "amd64"));

        let armv7 = catalog.filter(&and(vec![by_arch("arm"), by_arm("7")]));
        let names: Vec<_> = armv7.list().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["app_v7"]);
        assert_eq!(catalog.filter(&by_arm("6")).len(), 1);
        assert_eq!(catalog.filter(&by_arm("5")).len(), 0);
    }

    #[test]
    fn filtered_view_shares_records() {
        let catalog = Catalog::new();
        catalog.add(binary("app", "linux", "amd64"));
        let view = catalog.filter(&by_kind(ArtifactKind::Binary));
        assert!(Arc::ptr_eq(&catalog.list()[0], &view.list()[0]));
    }

    #[test]
    fn by_id_always_matches_checksums() {
        let checksum = Artifact::new(ArtifactKind::Checksum, "checksums.txt", "dist/checksums.txt");
        let owned = binary("app", "linux", "amd64").with_extra(EXTRA_ID, "app");
        let foreign = binary("other", "linux", "amd64").with_extra(EXTRA_ID, "other");

        let filter = by_id("app");
        assert!(filter.matches(&checksum));
        assert!(filter.matches(&owned));
        assert!(!filter.matches(&foreign));
        assert!(by_id("anything-else").matches(&checksum));
        assert!(!by_ids::<&str>(&[]).matches(&checksum));
    }

    #[test]
    fn format_filter_reads_extra() {
        let tgz = Artifact::new(ArtifactKind::UploadableArchive, "a.tar.gz", "dist/a.tar.gz")
            .with_extra(EXTRA_FORMAT, "tar.gz");
        let zip = Artifact::new(ArtifactKind::UploadableArchive, "a.zip", "dist/a.zip")
            .with_extra(EXTRA_FORMAT, "zip");
        let filter = by_formats(&["zip", "tar"]);
        assert!(filter.matches(&zip));
        assert!(!filter.matches(&tgz));
    }

    #[test]
    fn retyped_leaves_original_untouched() {
        let original = binary("app", "linux", "amd64");
        let uploadable = original.retyped(ArtifactKind::UploadableBinary);
        assert_eq!(original.kind, ArtifactKind::Binary);
        assert_eq!(uploadable.kind, ArtifactKind::UploadableBinary);
        assert_eq!(uploadable.path, original.path);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(ArtifactKind::UploadableArchive.to_string(), "Archive");
        assert_eq!(ArtifactKind::UploadableBinary.to_string(), "Binary");
        assert_eq!(ArtifactKind::ContainerImage.to_string(), "Container Image");
        assert_eq!(ArtifactKind::LinuxPackage.as_str(), "linux_package");
    }

    #[test]
    fn checksum_algorithm_parsing() {
        assert_eq!(
            "SHA512".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha512
        );
        assert!("md4".parse::<ChecksumAlgorithm>().is_err());
    }
}
