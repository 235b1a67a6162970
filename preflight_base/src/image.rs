//! Loading `docker save` style image archives
//!
//! Layout: a `manifest.json` listing the config blob and the layer tarballs in
//! application order. Layers may be plain or gzip compressed; the whole archive
//! may additionally be bzip2 compressed.

use crate::fsutil::{self, FileError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.json";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image archive not found: {0}")]
    NotFound(PathBuf),

    #[error(transparent)]
    File(#[from] FileError),

    #[error("invalid image manifest: {reason}")]
    Manifest { reason: String },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

/// Runtime settings from the image config blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "User", default)]
    pub user: String,
    #[serde(rename = "Labels", default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

/// Image config blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub rootfs: RootFs,
}

/// An image unpacked into a working directory
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub rootfs: PathBuf,
    pub config: ImageConfig,
    pub repo_tags: Vec<String>,
    pub layer_count: usize,
}

impl LoadedImage {
    /// Unpack `archive` below `workdir`
    pub fn from_archive(archive: &Path, workdir: &Path) -> Result<Self, ImageError> {
        if !archive.is_file() {
            return Err(ImageError::NotFound(archive.to_path_buf()));
        }
        fs::create_dir_all(workdir).map_err(|source| FileError::Io {
            path: workdir.to_path_buf(),
            source,
        })?;

        let tarball = if archive.extension().is_some_and(|ext| ext == "bz2") {
            let decompressed = workdir.join("image.tar");
            fsutil::bunzip2(archive, &decompressed)?;
            decompressed
        } else {
            archive.to_path_buf()
        };

        let extracted = workdir.join("archive");
        let file = File::open(&tarball).map_err(|source| FileError::Io {
            path: tarball.clone(),
            source,
        })?;
        fsutil::untar(&extracted, BufReader::new(file))?;

        let manifest_path = extracted.join(MANIFEST_FILE);
        let entries: Vec<ManifestEntry> = read_json(&manifest_path)?;
        let entry = entries.into_iter().next().ok_or_else(|| ImageError::Manifest {
            reason: "manifest lists no images".to_string(),
        })?;

        let config: ImageConfig = read_json(&archive_member(&extracted, &entry.config)?)?;

        let diff_ids = config.rootfs.diff_ids.len();
        if diff_ids > 0 && diff_ids != entry.layers.len() {
            return Err(ImageError::Manifest {
                reason: format!(
                    "manifest lists {} layers but the config has {} diff IDs",
                    entry.layers.len(),
                    diff_ids
                ),
            });
        }

        let rootfs = workdir.join("rootfs");
        fs::create_dir_all(&rootfs).map_err(|source| FileError::Io {
            path: rootfs.clone(),
            source,
        })?;

        for layer in &entry.layers {
            apply_layer_file(&archive_member(&extracted, layer)?, &rootfs)?;
        }

        Ok(Self {
            rootfs,
            config,
            repo_tags: entry.repo_tags.unwrap_or_default(),
            layer_count: entry.layers.len(),
        })
    }

    pub fn user(&self) -> &str {
        &self.config.config.user
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.config.config.labels.clone().unwrap_or_default()
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.config
            .config
            .labels
            .as_ref()
            .and_then(|labels| labels.get(name))
            .map(String::as_str)
    }

    /// Path inside the unpacked root filesystem
    pub fn path(&self, relative: &str) -> PathBuf {
        self.rootfs.join(relative.trim_start_matches('/'))
    }

    /// Like [`path`](Self::path) for names read from the image itself.
    ///
    /// `None` when `relative` climbs with `..` or, once symlinks are resolved,
    /// lands outside the root filesystem. Paths that do not exist yet are
    /// returned as long as they are lexically contained.
    pub fn contained_path(&self, relative: &str) -> Option<PathBuf> {
        let clean = fsutil::sanitize(Path::new(relative)).ok()?;
        let path = self.rootfs.join(clean);

        match fs::canonicalize(&path) {
            Ok(resolved) => {
                let root = fs::canonicalize(&self.rootfs).ok()?;
                resolved.starts_with(root).then_some(path)
            }
            Err(_) => Some(path),
        }
    }
}

/// Resolve a manifest reference to a regular file inside the extracted archive
fn archive_member(extracted: &Path, name: &str) -> Result<PathBuf, ImageError> {
    let unsafe_member = || ImageError::Manifest {
        reason: format!("'{}' does not name a file inside the archive", name),
    };

    let relative = fsutil::sanitize(Path::new(name)).map_err(|_| unsafe_member())?;
    if relative.as_os_str().is_empty() || relative != Path::new(name) {
        return Err(unsafe_member());
    }
    if fsutil::crosses_symlink(extracted, &relative) {
        return Err(unsafe_member());
    }

    let path = extracted.join(&relative);
    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(unsafe_member()),
        _ => Ok(path),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ImageError> {
    let content = fs::read(path).map_err(|source| FileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&content).map_err(|source| ImageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_layer_file(layer: &Path, rootfs: &Path) -> Result<(), ImageError> {
    let open = || {
        File::open(layer).map_err(|source| FileError::Io {
            path: layer.to_path_buf(),
            source,
        })
    };

    let mut magic = [0u8; 2];
    let compressed = open()?.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;

    let reader = BufReader::new(open()?);
    if compressed {
        fsutil::apply_layer(rootfs, flate2::read::GzDecoder::new(reader))?;
    } else {
        fsutil::apply_layer(rootfs, reader)?;
    }
    Ok(())
}
