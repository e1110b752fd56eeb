// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Bundle lifecycle operations: `list`, `install`, `remove`. Each takes an
//! explicit [`BundleContext`] rather than reaching for process-global
//! state, so a single process could in principle run more than one (still
//! sequential, per the core's concurrency model) without the operations
//! stepping on each other's subscriptions.

use thiserror::Error;

use crate::{
    environment,
    installation::{self, Session},
    manifest::{self, loader::ManifestLoader, Manifest, Name, Version},
    subscription::{self, Subscriptions},
};

pub mod install;
pub mod remove;

#[derive(Debug, Error)]
pub enum Error {
    #[error("acquiring session: {0}")]
    Session(#[from] installation::Error),
    #[error("loading manifest of manifests: {0}")]
    Mom(#[from] manifest::loader::Error),
    #[error("reading current OS version: {0}")]
    CurrentVersion(#[source] std::io::Error),
    #[error("subscription tracking: {0}")]
    Subscription(#[from] subscription::Error),
}

/// The mutable state threaded through a single bundle operation: the
/// locked session, the resolved current OS version, and the tracked
/// subscription set.
pub struct BundleContext {
    pub session: Session,
    pub loader: ManifestLoader,
    pub subscriptions: Subscriptions,
}

/// `init()` + current-version discovery + tracked-subscription load, the
/// common prefix of every bundle operation.
pub fn open(root: impl Into<std::path::PathBuf>) -> Result<BundleContext, Error> {
    let root = root.into();
    let session = installation::init(&root)?;
    let version = current_version(&root).map_err(Error::CurrentVersion)?;
    let subscriptions = Subscriptions::load_tracked(&root)?;

    Ok(BundleContext {
        loader: ManifestLoader::new(session.network.clone(), version),
        session,
        subscriptions,
    })
}

fn current_version(root: &std::path::Path) -> std::io::Result<Version> {
    let path = root.join("usr").join(".version");
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Version(s.trim().parse().unwrap_or(0))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Version(0)),
        Err(e) => Err(e),
    }
}

/// List every bundle advertised by the current MoM, one name per line in
/// the order the MoM declares them.
pub async fn list(ctx: &BundleContext) -> Result<Vec<Name>, Error> {
    let mom = ctx.loader.load_mom(ctx.loader.current_version()).await?;
    Ok(mom.bundle_names().collect())
}

pub(crate) fn root_path(ctx: &BundleContext) -> &std::path::Path {
    &ctx.session.installation.root
}

/// `os-core` is implicit on every system and rejecting its removal keeps
/// that invariant true without needing a special subscription entry for
/// it.
pub(crate) fn is_protected(name: &Name) -> bool {
    name.as_ref() == environment::OS_CORE
}

pub(crate) async fn current_mom(ctx: &BundleContext) -> Result<Manifest, manifest::loader::Error> {
    ctx.loader.load_mom(ctx.loader.current_version()).await
}

/// Shared end-to-end test scaffolding for `install`/`remove`: a mock
/// mirror standing in for the real fetcher, and a [`BundleContext`] built
/// directly against it.
#[cfg(test)]
pub(crate) mod support {
    use std::path::Path;

    use sha2::{Digest, Sha256};

    use super::{installation, BundleContext, ManifestLoader, Subscriptions, Version};
    use crate::manifest::Hash;

    /// Point a root's admin network config at a local mock server, before
    /// `open_context` initializes the session.
    pub(crate) fn write_mirror_config(root: &Path, mirror: &str) {
        let dir = root.join("etc/strata");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("network.conf"), format!("mirror: {mirror}\n")).unwrap();
    }

    /// Build a [`BundleContext`] against `root` at `version`, bypassing
    /// [`super::open`]'s on-disk current-version discovery so tests can pin
    /// the version directly.
    pub(crate) fn open_context(root: &Path, version: Version) -> BundleContext {
        let session = installation::init(root).expect("init");
        let subscriptions = Subscriptions::load_tracked(root).expect("load tracked");

        BundleContext {
            loader: ManifestLoader::new(session.network.clone(), version),
            session,
            subscriptions,
        }
    }

    /// Same digest the loader verifies sub-manifests against, so tests can
    /// compute a pointer hash for a manifest built in memory.
    pub(crate) fn content_hash(bytes: &[u8]) -> Hash {
        use std::str::FromStr;
        Hash::from_str(&hex::encode(Sha256::digest(bytes))).unwrap()
    }
}
