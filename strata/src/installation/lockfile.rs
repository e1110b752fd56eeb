// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    io::{self},
    os::fd::AsRawFd,
    path::PathBuf,
    sync::Arc,
};

use fs_err::{self as fs, File};
use nix::fcntl::{flock, FlockArg};
use thiserror::Error;

/// An acquired file lock guaranteeing exclusive access
/// to the underlying directory.
///
/// The lock is automatically released once all instances
/// of this ref counted lock are dropped.
#[derive(Debug, Clone)]
#[allow(unused)]
pub struct Lock(Arc<File>);

/// Acquires a process-wide exclusive file lock at `path`, creating it if
/// absent. Never blocks: another updater already holding the lock is
/// reported immediately as [`Error::Busy`] rather than queued behind, per
/// the core's "no wait-queue" concurrency model — at most one bundle
/// operation runs against an installation at a time, and a second
/// invocation should fail fast, not pile up waiting for the first.
pub fn acquire(path: impl Into<PathBuf>) -> Result<Lock, Error> {
    let path = path.into();

    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(Lock(Arc::new(file))),
        Err(nix::errno::Errno::EWOULDBLOCK) => Err(Error::Busy),
        Err(e) => Err(Error::Flock(e)),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io")]
    Io(#[from] io::Error),
    #[error("installation is locked by another updater process")]
    Busy,
    #[error("obtaining exclusive file lock")]
    Flock(#[source] nix::Error),
}
