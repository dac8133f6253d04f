//! Bundle creation
//!
//! Packs the fixed list of application paths into a gzip-compressed tar
//! archive. All paths are checked before anything is written, and the
//! archive is assembled in a temporary file that is renamed into place,
//! so the archive path never holds a half-written file.

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::config::file::BundleConfig;
use crate::error::{DeployError, DeployResult};

/// Directory names never shipped to the server
const SKIPPED_DIRS: &[&str] = &["__pycache__", ".git", "node_modules"];

/// What to pack and where
#[derive(Clone, Debug)]
pub struct BundleSpec {
    pub root: PathBuf,
    pub archive: PathBuf,
    pub paths: Vec<String>,
}

impl BundleSpec {
    pub fn from_config(config: &BundleConfig) -> Self {
        Self {
            root: config.root.clone(),
            archive: config.archive.clone(),
            paths: config.paths.clone(),
        }
    }

    /// Archive location, relative paths resolved against the project root
    pub fn archive_path(&self) -> PathBuf {
        if self.archive.is_absolute() {
            self.archive.clone()
        } else {
            self.root.join(&self.archive)
        }
    }
}

/// A finished archive
#[derive(Clone, Debug)]
pub struct Bundle {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub entries: usize,
}

/// Build the archive on a blocking thread
pub async fn create(spec: BundleSpec) -> DeployResult<Bundle> {
    spawn_blocking(move || create_sync(&spec))
        .await
        .map_err(|e| DeployError::Packaging(e.to_string()))?
}

/// Build the archive, overwriting any previous one
pub fn create_sync(spec: &BundleSpec) -> DeployResult<Bundle> {
    for path in &spec.paths {
        if fs::symlink_metadata(spec.root.join(path)).is_err() {
            return Err(DeployError::MissingSource(PathBuf::from(path)));
        }
    }

    let archive_path = spec.archive_path();
    let parent = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let temp = tempfile::Builder::new()
        .prefix(".bundle-")
        .suffix(".partial")
        .tempfile_in(parent)?;

    let mut entries = 0;
    {
        let encoder = GzEncoder::new(temp.as_file(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        for path in &spec.paths {
            entries += append_path(&mut builder, &spec.root.join(path), Path::new(path))?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| DeployError::Packaging(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| DeployError::Packaging(e.to_string()))?;
    }
    temp.as_file().sync_all()?;

    // persist 覆盖同名旧归档
    temp.persist(&archive_path)
        .map_err(|e| DeployError::Packaging(e.error.to_string()))?;

    let size = fs::metadata(&archive_path)?.len();
    let sha256 = sha256_file(&archive_path)?;

    info!(
        archive = %archive_path.display(),
        size,
        entries,
        sha256 = %sha256,
        "Bundle created"
    );

    Ok(Bundle {
        path: archive_path,
        size,
        sha256,
        entries,
    })
}

fn append_path<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    source: &Path,
    name: &Path,
) -> DeployResult<usize> {
    let metadata = fs::symlink_metadata(source)?;

    if !metadata.is_dir() {
        builder.append_path_with_name(source, name)?;
        return Ok(1);
    }

    builder.append_dir(name, source)?;
    let mut count = 1;

    let mut children: Vec<_> = fs::read_dir(source)?.collect::<Result<_, _>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let file_name = child.file_name();
        let child_path = child.path();
        let is_dir = child.file_type()?.is_dir();

        if is_dir && SKIPPED_DIRS.iter().any(|s| file_name == *s) {
            debug!(path = %child_path.display(), "Skipping directory");
            continue;
        }
        if !is_dir && child_path.extension().map_or(false, |ext| ext == "pyc") {
            continue;
        }

        count += append_path(builder, &child_path, &name.join(&file_name))?;
    }

    Ok(count)
}

/// SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let contents = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}
