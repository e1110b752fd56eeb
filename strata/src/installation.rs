// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use log::trace;
use nix::unistd::{access, AccessFlags, Uid};
use thiserror::Error;

use crate::{config, environment};

pub mod lockfile;

/// System mutability - do we have readwrite?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// We only have readonly access
    ReadOnly,
    /// We have read-write access
    ReadWrite,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::ReadOnly => "read-only".fmt(f),
            Mutability::ReadWrite => "read-write".fmt(f),
        }
    }
}

/// A system root this updater operates against: its mutability, and the
/// paths beneath it this core reads and writes.
#[derive(Debug, Clone)]
pub struct Installation {
    pub root: PathBuf,
    pub mutability: Mutability,
}

impl Installation {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();

        let mutability = if Uid::effective().is_root() {
            Mutability::ReadWrite
        } else if access(&root, AccessFlags::W_OK).is_ok() {
            Mutability::ReadWrite
        } else {
            Mutability::ReadOnly
        };

        trace!("Mutability: {mutability}");
        trace!("Root dir: {root:?}");

        Self { root, mutability }
    }

    pub fn read_only(&self) -> bool {
        matches!(self.mutability, Mutability::ReadOnly)
    }

    /// State directory holding the lock file and staging subdirectories,
    /// private to this updater (`<root>/.strata`).
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".strata")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(environment::LOCK_FILE)
    }

    pub fn staged_dir(&self) -> PathBuf {
        self.state_dir().join(environment::STAGED_DIR)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.state_dir().join(environment::DOWNLOAD_DIR)
    }

    pub fn delta_dir(&self) -> PathBuf {
        self.state_dir().join(environment::DELTA_DIR)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("installation root is read-only")]
    ReadOnly,
    #[error("acquiring lock: {0}")]
    Lock(#[from] lockfile::Error),
    #[error("preparing state directory {0:?}: {1}")]
    PrepareDir(PathBuf, #[source] std::io::Error),
}

/// A running updater's view of one installation: the exclusive lock held
/// for its lifetime, the installation's paths/mutability, and the
/// resolved network tuning. Dropping the session releases the lock.
pub struct Session {
    pub installation: Installation,
    pub network: config::NetworkConfig,
    pub ignore: config::IgnoreConfig,
    _lock: lockfile::Lock,
}

/// Acquire the process-wide exclusive lock, prepare the staging directory
/// tree (`staged/`, `download/`, `delta/`, mode `0700`), and load the
/// layered network config. Fails with [`Error::Lock`] (`Busy`) if another
/// updater already holds the lock, or [`Error::ReadOnly`] if the root
/// cannot be mutated.
pub fn init(root: impl Into<PathBuf>) -> Result<Session, Error> {
    let installation = Installation::open(root);

    if installation.read_only() {
        return Err(Error::ReadOnly);
    }

    fs::create_dir_all(installation.state_dir()).map_err(|e| Error::PrepareDir(installation.state_dir(), e))?;

    let lock = lockfile::acquire(installation.lock_path())?;

    for dir in [installation.staged_dir(), installation.download_dir(), installation.delta_dir()] {
        fs::create_dir_all(&dir).map_err(|e| Error::PrepareDir(dir.clone(), e))?;
        set_mode_0700(&dir);
    }

    let network = config::network_config(&installation.root);
    let ignore = config::ignore_config(&installation.root);

    Ok(Session {
        installation,
        network,
        ignore,
        _lock: lock,
    })
}

/// Explicit release, for callers that want to drop the lock before the
/// session value itself goes out of scope.
pub fn deinit(session: Session) {
    drop(session);
}

#[cfg(unix)]
fn set_mode_0700(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o700));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn init_creates_staging_tree_and_locks() {
        let dir = tempfile::tempdir().unwrap();

        let session = init(dir.path()).unwrap();
        assert!(session.installation.staged_dir().is_dir());
        assert!(session.installation.download_dir().is_dir());
        assert!(session.installation.delta_dir().is_dir());
    }

    #[test]
    fn second_init_fails_busy() {
        let dir = tempfile::tempdir().unwrap();

        let _first = init(dir.path()).unwrap();
        let second = init(dir.path());

        assert!(matches!(second, Err(Error::Lock(lockfile::Error::Busy))));
    }
}
