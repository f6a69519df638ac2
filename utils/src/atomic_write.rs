//! Atomic file write helpers.
//!
//! Temp file + rename. On Windows, rename-over-existing fails, so replacing
//! an existing file goes through a `.bak` backup that is restored on failure.

#[cfg(unix)]
use std::fs::File;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overwrite {
    /// Replace an existing file atomically.
    #[default]
    Replace,
    /// Fail if the destination already exists.
    Refuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// `sync_all` the file, then best-effort sync the parent directory.
    #[default]
    Durable,
    SkipSync,
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact name {name:?} must be a plain file name")]
    InvalidName { name: String },
    #[error("{} already exists", path.display())]
    Exists { path: PathBuf },
    #[error("failed to write {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Recover from an interrupted replace by restoring `path.bak`.
///
/// If `path` is missing but its backup exists, a crash hit the window
/// between the backup rename and the final persist.
pub fn recover_bak_file(path: &Path) {
    let backup = path.with_extension("bak");
    if !path.exists() && backup.exists() {
        match fs::rename(&backup, path) {
            Ok(()) => {
                tracing::warn!(
                    path = %path.display(),
                    "Recovered .bak file from interrupted atomic write"
                );
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to recover .bak file: {e}");
            }
        }
    }
}

pub fn atomic_write(
    path: impl AsRef<Path>,
    bytes: &[u8],
    overwrite: Overwrite,
    sync: SyncPolicy,
) -> io::Result<()> {
    let path = path.as_ref();
    let parent = parent_dir(path);

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    if sync == SyncPolicy::Durable {
        tmp.as_file().sync_all()?;
    }

    match overwrite {
        Overwrite::Refuse => {
            if let Err(err) = tmp.persist_noclobber(path) {
                return Err(err.error);
            }
        }
        Overwrite::Replace => persist_replacing(tmp, path)?,
    }

    if sync == SyncPolicy::Durable {
        best_effort_sync_parent_dir(parent);
    }
    Ok(())
}

fn persist_replacing(tmp: NamedTempFile, path: &Path) -> io::Result<()> {
    let Err(err) = tmp.persist(path) else {
        return Ok(());
    };
    if !path.exists() {
        return Err(err.error);
    }

    let backup = path.with_extension("bak");
    let _ = fs::remove_file(&backup);
    fs::rename(path, &backup)?;
    if let Err(rename_err) = err.file.persist(path) {
        let _ = fs::rename(&backup, path);
        return Err(rename_err.error);
    }
    if let Err(e) = fs::remove_file(&backup) {
        tracing::warn!(
            path = %backup.display(),
            "Failed to remove .bak after atomic write: {e}"
        );
    }
    Ok(())
}

/// Write each `(file name, bytes)` pair into `dir`, creating it if needed.
///
/// Names must be bare file names. With [`Overwrite::Refuse`], every
/// destination is checked before anything is written, so a clash leaves
/// the directory untouched.
pub fn write_artifacts<'a, I>(
    dir: &Path,
    files: I,
    overwrite: Overwrite,
) -> Result<Vec<PathBuf>, ArtifactError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let files: Vec<_> = files.into_iter().collect();
    let mut targets = Vec::with_capacity(files.len());
    for (name, _) in &files {
        let mut components = Path::new(name).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !plain {
            return Err(ArtifactError::InvalidName {
                name: (*name).to_string(),
            });
        }
        let path = dir.join(name);
        if overwrite == Overwrite::Refuse && path.exists() {
            return Err(ArtifactError::Exists { path });
        }
        targets.push(path);
    }

    fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for (path, (_, bytes)) in targets.iter().zip(&files) {
        atomic_write(path, bytes, overwrite, SyncPolicy::Durable).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                ArtifactError::Exists { path: path.clone() }
            } else {
                ArtifactError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote artifact");
    }
    Ok(targets)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn best_effort_sync_parent_dir(parent: &Path) {
    if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
        debug!(path = %parent.display(), "Parent directory sync_all failed (best-effort): {e}");
    }
}

#[cfg(not(unix))]
fn best_effort_sync_parent_dir(_parent: &Path) {}
