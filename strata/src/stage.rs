// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Content-addressed staging and atomic commit of bundle files into a live
//! root, grounded in `client/cache.rs`'s hash-sharded download path scheme
//! and adapted from package blobs to individual file contents.

use std::{
    io,
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};

use crate::{
    config::NetworkConfig,
    environment,
    manifest::{File as ManifestFile, Hash, Kind},
    request, signal,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("fetching content for {0}: {1}")]
    Fetch(Hash, #[source] request::Error),
    #[error("io error at {0:?}: {1}")]
    Io(PathBuf, #[source] io::Error),
    #[error("file {0:?} has no entry in the manifest to repair its parent from")]
    NoRepairSource(PathBuf),
    #[error("installing signal guard: {0}")]
    SignalGuard(#[from] signal::Error),
}

/// Path under `download/` that a content blob with `hash` is (or would be)
/// cached at, sharded the way `client/cache.rs` shards package downloads.
pub fn download_path(state_dir: &Path, hash: &Hash) -> PathBuf {
    let hex = hash.to_string();
    state_dir
        .join(environment::DOWNLOAD_DIR)
        .join(&hex[..2])
        .join(&hex[2..4])
        .join(hex)
}

/// Path under `staged/` that a file destined for `final_path` is staged at
/// before the commit-phase rename.
fn staged_path(state_dir: &Path, final_path: &str) -> PathBuf {
    state_dir.join(environment::STAGED_DIR).join(final_path.trim_start_matches('/'))
}

/// Ensure the content blob identified by `hash` is present under
/// `download/`, fetching it from the mirror if it's missing.
async fn ensure_content(state_dir: &Path, hash: &Hash, config: &NetworkConfig) -> Result<PathBuf, Error> {
    let path = download_path(state_dir, hash);

    if fs::try_exists(&path).await.map_err(|e| Error::Io(path.clone(), e))? {
        return Ok(path);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| Error::Io(parent.to_path_buf(), e))?;
    }

    let url = format!("{}/content/{}", config.mirror, hash);
    let bytes = request::fetch(&url, config).await.map_err(|e| Error::Fetch(*hash, e))?;

    let mut out = File::create(&path).await.map_err(|e| Error::Io(path.clone(), e))?;
    out.write_all(&bytes).await.map_err(|e| Error::Io(path.clone(), e))?;
    out.flush().await.map_err(|e| Error::Io(path.clone(), e))?;

    Ok(path)
}

/// Ensure `file`'s content exists under `staged/`, reconstructing its
/// declared kind (regular file, directory, symlink) at the staged path. On
/// failure, attempts `repair_path` to backfill any missing parent
/// directories from the MoM's consolidated view, then retries once.
pub async fn stage(
    state_dir: &Path,
    file: &ManifestFile,
    consolidated: &[ManifestFile],
    config: &NetworkConfig,
) -> Result<PathBuf, Error> {
    match stage_once(state_dir, file, config).await {
        Ok(path) => Ok(path),
        Err(_) => {
            repair_path(state_dir, &file.path, consolidated, config).await?;
            stage_once(state_dir, file, config).await
        }
    }
}

async fn stage_once(state_dir: &Path, file: &ManifestFile, config: &NetworkConfig) -> Result<PathBuf, Error> {
    let staged = staged_path(state_dir, &file.path);

    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent).await.map_err(|e| Error::Io(parent.to_path_buf(), e))?;
    }

    match file.kind {
        Kind::Regular => {
            let content = ensure_content(state_dir, &file.hash, config).await?;
            fs::copy(&content, &staged).await.map_err(|e| Error::Io(staged.clone(), e))?;
        }
        Kind::Directory => {
            fs::create_dir_all(&staged).await.map_err(|e| Error::Io(staged.clone(), e))?;
        }
        Kind::Symlink => {
            let content = ensure_content(state_dir, &file.hash, config).await?;
            let target = fs::read_to_string(&content).await.map_err(|e| Error::Io(content.clone(), e))?;
            let _ = fs::remove_file(&staged).await;
            symlink(target, &staged).map_err(|e| Error::Io(staged.clone(), e))?;
        }
        Kind::ManifestPointer => unreachable!("manifest pointer entries are never staged as files"),
    }

    Ok(staged)
}

/// Walk the parent chain of `path`, creating any missing directories from
/// their canonical entries in `consolidated`, so a retried `stage_once`
/// has somewhere to write.
async fn repair_path(state_dir: &Path, path: &str, consolidated: &[ManifestFile], config: &NetworkConfig) -> Result<(), Error> {
    let mut ancestors: Vec<&str> = Path::new(path)
        .ancestors()
        .filter_map(|p| p.to_str())
        .filter(|p| !p.is_empty() && *p != path)
        .collect();
    ancestors.reverse();

    for ancestor in ancestors {
        let entry = consolidated
            .iter()
            .find(|f| f.path == ancestor)
            .ok_or_else(|| Error::NoRepairSource(PathBuf::from(ancestor)))?;

        if matches!(entry.kind, Kind::Directory) {
            Box::pin(stage_once(state_dir, entry, config)).await?;
        }
    }

    Ok(())
}

/// Commit every staged file onto its final path with an atomic rename,
/// recording each completed rename in a journal so a future run can detect
/// (and a human can diagnose) a process kill mid-commit. The journal is
/// removed once every rename has succeeded.
pub async fn commit(state_dir: &Path, root: &Path, files: &[ManifestFile]) -> Result<(), Error> {
    let journal_path = state_dir.join(environment::STAGED_DIR).join(environment::JOURNAL_NAME);
    let mut journal = File::create(&journal_path).await.map_err(|e| Error::Io(journal_path.clone(), e))?;

    // A process kill mid-rename is exactly the partial-install case the
    // journal exists to diagnose; ignore interrupt signals for the
    // duration of the rename pass to shrink that window.
    let _signal_guard = signal::ignore([signal::Signal::SIGINT, signal::Signal::SIGTERM])?;

    for file in files {
        if file.is_deleted() {
            continue;
        }

        let staged = staged_path(state_dir, &file.path);
        let target = root.join(file.path.trim_start_matches('/'));

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Error::Io(parent.to_path_buf(), e))?;
        }

        fs::rename(&staged, &target).await.map_err(|e| Error::Io(target.clone(), e))?;

        if matches!(file.kind, Kind::Regular) {
            let mode = if file.flags.contains(crate::manifest::Flags::IS_BOOT) {
                0o755
            } else {
                0o644
            };
            let _ = fs::set_permissions(&target, std::fs::Permissions::from_mode(mode)).await;
        }

        let line = format!("{}\t{}\n", staged.display(), target.display());
        journal.write_all(line.as_bytes()).await.map_err(|e| Error::Io(journal_path.clone(), e))?;
    }

    journal.flush().await.map_err(|e| Error::Io(journal_path.clone(), e))?;
    drop(journal);

    fs::remove_file(&journal_path).await.map_err(|e| Error::Io(journal_path, e))?;

    Ok(())
}

/// Unlink a removed file's final path: symlinks and regular files are
/// removed outright, directories only if empty (a non-empty directory is
/// still owned by content outside this bundle and removal failures there
/// are logged and ignored, never fatal).
pub async fn unstage(root: &Path, file: &ManifestFile) -> Result<(), Error> {
    let target = root.join(file.path.trim_start_matches('/'));

    match file.kind {
        Kind::Directory => {
            if let Err(e) = fs::remove_dir(&target).await {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("leaving non-empty directory {target:?} in place: {e}");
                }
            }
        }
        Kind::Regular | Kind::Symlink => match fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(target, e)),
        },
        Kind::ManifestPointer => {}
    }

    Ok(())
}

/// Barrier flushing every staged write to disk before the operation is
/// considered durable. The only point in the pipeline where concurrency
/// (inside the fetcher) is allowed to still be in flight.
pub fn sync() {
    nix::unistd::sync();
}

/// Run every executable hook under `usr/share/strata/hooks/<phase>.d/`, in
/// directory order, ignoring missing phases. Hooks are plain executables
/// invoked with no arguments; a non-zero exit is logged but does not fail
/// the operation (the teacher's container-isolated trigger system is out
/// of scope here — hooks run directly against the live root).
pub fn run_hooks(root: &Path, phase: &str) {
    let dir = root.join(environment::HOOKS_DIR).join(format!("{phase}.d"));

    let Ok(mut entries) = std::fs::read_dir(&dir).map(|rd| rd.flatten().collect::<Vec<_>>()) else {
        return;
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        match std::process::Command::new(&path).status() {
            Ok(status) if status.success() => {}
            Ok(status) => log::warn!("hook {path:?} exited with {status}"),
            Err(e) => log::warn!("failed to run hook {path:?}: {e}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifest::{Flags, Version};

    fn regular(path: &str, hash: u8) -> ManifestFile {
        ManifestFile {
            path: path.to_owned(),
            hash: Hash([hash; 32]),
            kind: Kind::Regular,
            flags: Flags::NONE,
            last_change: Version(1),
            staging: None,
        }
    }

    #[tokio::test]
    async fn stage_directory_creates_staged_dir() {
        let state_dir = tempfile::tempdir().unwrap();
        let dir_entry = ManifestFile {
            path: "/usr/share/doc".to_owned(),
            hash: Hash::ZERO,
            kind: Kind::Directory,
            flags: Flags::NONE,
            last_change: Version(1),
            staging: None,
        };

        let config = NetworkConfig::default();
        let staged = stage_once(state_dir.path(), &dir_entry, &config).await.unwrap();
        assert!(staged.is_dir());
    }

    #[tokio::test]
    async fn commit_renames_staged_file_onto_root_and_clears_journal() {
        let state_dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();

        let staged_file = state_dir.path().join(environment::STAGED_DIR).join("usr/bin/ed");
        fs::create_dir_all(staged_file.parent().unwrap()).await.unwrap();
        fs::write(&staged_file, b"binary").await.unwrap();

        let file = regular("/usr/bin/ed", 1);
        commit(state_dir.path(), root.path(), &[file]).await.unwrap();

        assert!(root.path().join("usr/bin/ed").exists());
        assert!(!state_dir.path().join(environment::STAGED_DIR).join(environment::JOURNAL_NAME).exists());
    }

    #[tokio::test]
    async fn unstage_removes_regular_file() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("usr/bin")).await.unwrap();
        fs::write(root.path().join("usr/bin/ed"), b"x").await.unwrap();

        let file = regular("/usr/bin/ed", 1);
        unstage(root.path(), &file).await.unwrap();

        assert!(!root.path().join("usr/bin/ed").exists());
    }

    #[tokio::test]
    async fn unstage_leaves_nonempty_directory() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("usr/share/doc")).await.unwrap();
        fs::write(root.path().join("usr/share/doc/file"), b"x").await.unwrap();

        let dir_entry = ManifestFile {
            path: "/usr/share/doc".to_owned(),
            hash: Hash::ZERO,
            kind: Kind::Directory,
            flags: Flags::NONE,
            last_change: Version(1),
            staging: None,
        };

        unstage(root.path(), &dir_entry).await.unwrap();
        assert!(root.path().join("usr/share/doc").exists());
    }
}
