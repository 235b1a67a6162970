//! Artifact writers
//!
//! Checks persist auxiliary files (extracted manifests, logs) through an
//! `ArtifactWriter`. One writer is scoped to one platform run, rooted at
//! `<artifacts-root>/<platform>/`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("invalid artifact name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("failed to write artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Sink for files produced during a run
pub trait ArtifactWriter: Send + Sync {
    /// Persist `contents` under `name`, returning where it landed
    fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, ArtifactError>;

    /// Root directory of this writer
    fn path(&self) -> &Path;
}

/// Reference to an artifact written during a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub path: PathBuf,
}

/// Names must stay inside the writer root.
fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let invalid = |reason: &str| ArtifactError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }

    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory references")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"))
            }
        }
    }

    Ok(())
}

/// Writes artifacts below a directory on disk
pub struct FilesystemWriter {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FilesystemWriter {
    /// Create the writer, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::Io {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }
}

impl ArtifactWriter for FilesystemWriter {
    fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, ArtifactError> {
        validate_name(name)?;
        let full_path = self.dir.join(name);

        // Writes are serialized; a poisoned lock still guards nothing but ordering.
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&full_path, contents).map_err(|source| ArtifactError::Io {
            path: full_path.clone(),
            source,
        })?;

        Ok(full_path)
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}

/// In-memory writer
pub struct MapWriter {
    root: PathBuf,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MapWriter {
    pub fn new() -> Self {
        Self::with_root("memory")
    }

    /// Report paths relative to `root` without touching the filesystem
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }
}

impl Default for MapWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactWriter for MapWriter {
    fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, ArtifactError> {
        validate_name(name)?;
        self.files
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), contents.to_vec());
        Ok(self.root.join(name))
    }

    fn path(&self) -> &Path {
        &self.root
    }
}

/// Wraps the run's writer for one check and remembers what it wrote
pub(crate) struct RecordingWriter<'a> {
    inner: &'a dyn ArtifactWriter,
    written: Mutex<Vec<ArtifactRef>>,
}

impl<'a> RecordingWriter<'a> {
    pub(crate) fn new(inner: &'a dyn ArtifactWriter) -> Self {
        Self {
            inner,
            written: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn into_refs(self) -> Vec<ArtifactRef> {
        self.written.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

impl ArtifactWriter for RecordingWriter<'_> {
    fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, ArtifactError> {
        let path = self.inner.write_file(name, contents)?;
        self.written
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ArtifactRef {
                name: name.to_string(),
                path: path.clone(),
            });
        Ok(path)
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_filesystem_writer_creates_nested_files() {
        let temp = tempfile::tempdir().unwrap();
        let writer = FilesystemWriter::new(temp.path().join("amd64")).unwrap();

        let path = writer
            .write_file("bundle/annotations.yaml", b"annotations: {}")
            .unwrap();

        assert_eq!(path, temp.path().join("amd64/bundle/annotations.yaml"));
        assert_eq!(fs::read(&path).unwrap(), b"annotations: {}");
    }

    #[test]
    fn test_names_cannot_escape_root() {
        let writer = MapWriter::new();

        assert_matches!(
            writer.write_file("../outside.txt", b""),
            Err(ArtifactError::InvalidName { .. })
        );
        assert_matches!(
            writer.write_file("/etc/passwd", b""),
            Err(ArtifactError::InvalidName { .. })
        );
        assert_matches!(writer.write_file("  ", b""), Err(ArtifactError::InvalidName { .. }));
    }

    #[test]
    fn test_recording_writer_tracks_refs() {
        let inner = MapWriter::with_root("/runs/s390x");
        let recording = RecordingWriter::new(&inner);

        recording.write_file("a.txt", b"a").unwrap();
        recording.write_file("b.txt", b"b").unwrap();
        let refs = recording.into_refs();

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].path, PathBuf::from("/runs/s390x/b.txt"));
        assert_eq!(inner.get("a.txt"), Some(b"a".to_vec()));
    }
}
