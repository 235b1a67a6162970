//! File helpers: tar extraction, bzip2, downloads and artifact files

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive entry '{path}' escapes the destination directory")]
    UnsafePath { path: PathBuf },

    #[error("failed to read archive: {0}")]
    Archive(#[source] io::Error),

    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> FileError + '_ {
    move |source| FileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Fetch `url` into `filename`
pub fn download_file(filename: &Path, url: &str) -> Result<(), FileError> {
    let download_err = |source| FileError::Download {
        url: url.to_string(),
        source,
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;

    let mut out = File::create(filename).map_err(io_err(filename))?;
    response.copy_to(&mut out).map_err(download_err)?;
    Ok(())
}

/// Decompress a bzip2 file into `destination`
pub fn bunzip2(bzip_file: &Path, destination: &Path) -> Result<(), FileError> {
    let input = File::open(bzip_file).map_err(io_err(bzip_file))?;
    let mut decoder = bzip2::read::BzDecoder::new(input);
    let mut out = File::create(destination).map_err(io_err(destination))?;
    io::copy(&mut decoder, &mut out).map_err(io_err(destination))?;
    Ok(())
}

/// Write `contents` to `dir/filename`, returning the full path
pub fn write_file_to_artifacts(
    dir: &Path,
    filename: &str,
    contents: &str,
) -> Result<PathBuf, FileError> {
    let full_path = dir.join(filename);
    fs::write(&full_path, contents).map_err(io_err(&full_path))?;
    Ok(full_path)
}

/// Extract a tar stream below `dst`.
///
/// Directories, regular files and links are created; failures creating links are
/// logged and skipped.
pub fn untar<R: Read>(dst: &Path, reader: R) -> Result<(), FileError> {
    unpack(dst, reader, false)
}

/// Extract an image layer over an existing root filesystem, honouring whiteouts
pub(crate) fn apply_layer<R: Read>(rootfs: &Path, reader: R) -> Result<(), FileError> {
    unpack(rootfs, reader, true)
}

/// Strip leading `/` and `./`, reject `..`
pub(crate) fn sanitize(path: &Path) -> Result<PathBuf, FileError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(FileError::UnsafePath {
                    path: path.to_path_buf(),
                })
            }
        }
    }
    Ok(clean)
}

/// True when any parent of `relative` below `dst` is a symlink
pub(crate) fn crosses_symlink(dst: &Path, relative: &Path) -> bool {
    let mut current = dst.to_path_buf();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            current.push(component);
            if fs::symlink_metadata(&current)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false)
            {
                return true;
            }
        }
    }
    false
}

/// Hard link sources must resolve inside `dst` without following symlinks
fn hard_link_source(dst: &Path, link_name: &Path) -> Result<PathBuf, FileError> {
    let relative = sanitize(link_name)?;
    let source = dst.join(&relative);
    let is_symlink = fs::symlink_metadata(&source)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);

    if crosses_symlink(dst, &relative) || is_symlink {
        return Err(FileError::UnsafePath {
            path: link_name.to_path_buf(),
        });
    }
    Ok(source)
}

fn remove_existing(path: &Path) -> Result<(), FileError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(io_err(path)),
        Ok(_) => fs::remove_file(path).map_err(io_err(path)),
        Err(_) => Ok(()),
    }
}

fn unpack<R: Read>(dst: &Path, reader: R, whiteouts: bool) -> Result<(), FileError> {
    fs::create_dir_all(dst).map_err(io_err(dst))?;

    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().map_err(FileError::Archive)?;

    for entry in entries {
        let mut entry = entry.map_err(FileError::Archive)?;
        let raw_path = entry.path().map_err(FileError::Archive)?.into_owned();
        let relative = sanitize(&raw_path)?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        if crosses_symlink(dst, &relative) {
            log::warn!(
                "skipping archive entry {} below a symbolic link",
                relative.display()
            );
            continue;
        }

        let target = dst.join(&relative);

        if whiteouts {
            let file_name = relative
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if file_name == OPAQUE_WHITEOUT {
                if let Some(parent) = target.parent() {
                    if let Ok(children) = fs::read_dir(parent) {
                        for child in children.flatten() {
                            remove_existing(&child.path())?;
                        }
                    }
                }
                continue;
            }

            if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
                remove_existing(&target.with_file_name(hidden))?;
                continue;
            }
        }

        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            if !target.is_dir() {
                remove_existing(&target)?;
                fs::create_dir_all(&target).map_err(io_err(&target))?;
            }
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            remove_existing(&target)?;

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&target)
                .map_err(io_err(&target))?;
            io::copy(&mut entry, &mut file).map_err(io_err(&target))?;

            #[cfg(unix)]
            if let Ok(mode) = entry.header().mode() {
                use std::os::unix::fs::PermissionsExt;
                let permissions = fs::Permissions::from_mode((mode & 0o7777) | 0o200);
                fs::set_permissions(&target, permissions).map_err(io_err(&target))?;
            }
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            let link_name = match entry.link_name() {
                Ok(Some(name)) => name.into_owned(),
                _ => {
                    log::warn!("link {} has no target, ignoring", relative.display());
                    continue;
                }
            };

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            remove_existing(&target)?;

            let created = if entry_type.is_symlink() {
                create_symlink(&link_name, &target)
            } else {
                hard_link_source(dst, &link_name).and_then(|source| {
                    fs::hard_link(source, &target).map_err(io_err(&target))
                })
            };

            if let Err(e) = created {
                log::warn!(
                    "error creating link {} -> {}: {}. Ignoring.",
                    relative.display(),
                    link_name.display(),
                    e
                );
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn create_symlink(link_name: &Path, target: &Path) -> Result<(), FileError> {
    std::os::unix::fs::symlink(link_name, target).map_err(io_err(target))
}

#[cfg(not(unix))]
fn create_symlink(_link_name: &Path, target: &Path) -> Result<(), FileError> {
    Err(FileError::Io {
        path: target.to_path_buf(),
        source: io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported"),
    })
}
