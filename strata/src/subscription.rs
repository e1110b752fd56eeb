// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Tracking of which bundles a system has explicitly (or transitively)
//! opted in to. Mirrors an installed-package set, but backed by marker
//! files under [`environment::TRACKED_BUNDLES_DIR`] rather than a
//! database, per the wider updater's file-marker convention.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{
    environment,
    manifest::{Manifest, Name, Version},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("bundle not tracked: {0}")]
    NotTracked(Name),
    #[error("io error reading tracked bundles at {0:?}: {1}")]
    Io(PathBuf, #[source] io::Error),
}

/// The set of bundles tracked on a system, with the version each was last
/// synced to. Threaded explicitly through a session rather than kept as
/// process-global state.
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    tracked: BTreeMap<Name, Version>,
}

impl Subscriptions {
    /// Load the tracked set from `<root>/usr/share/clear/bundles/*`. Each
    /// marker file is named after the bundle and holds its tracked
    /// version as decimal text; a missing or empty directory yields an
    /// empty set.
    pub fn load_tracked(root: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = root.as_ref().join(environment::TRACKED_BUNDLES_DIR);

        let mut tracked = BTreeMap::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self { tracked }),
            Err(e) => return Err(Error::Io(dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| Error::Io(dir.clone(), e))?;
            let path = entry.path();

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let version = fs::read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .map(Version)
                .unwrap_or_default();

            tracked.insert(Name::from(name), version);
        }

        Ok(Self { tracked })
    }

    pub fn is_tracked(&self, name: &Name) -> bool {
        self.tracked.contains_key(name)
    }

    pub fn version_of(&self, name: &Name) -> Option<Version> {
        self.tracked.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.tracked.keys()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Record `name` as tracked at `version`, in memory only. Idempotent:
    /// subscribing to an already-tracked bundle just refreshes its recorded
    /// version. Does not touch the marker file on disk — callers must
    /// follow up with [`Self::persist`] once whatever filesystem change the
    /// subscription represents has actually committed. §4.7 step 8 requires
    /// the marker to only ever be written at that canonical commit point, so
    /// a bundle that never finishes staging never gets a marker claiming it
    /// did.
    pub fn subscribe(&mut self, name: Name, version: Version) {
        self.tracked.insert(name, version);
    }

    /// Write the marker file for an already (in-memory) tracked `name`.
    /// Called once, after the commit point, for every bundle a install
    /// actually finished staging.
    pub fn persist(&self, root: impl AsRef<Path>, name: &Name) -> Result<(), Error> {
        let version = self.tracked.get(name).ok_or_else(|| Error::NotTracked(name.clone()))?;

        let dir = root.as_ref().join(environment::TRACKED_BUNDLES_DIR);
        fs::create_dir_all(&dir).map_err(|e| Error::Io(dir.clone(), e))?;

        let marker = dir.join(name.as_ref());
        fs::write(&marker, version.to_string()).map_err(|e| Error::Io(marker, e))?;

        Ok(())
    }

    /// Remove `name` from the tracked set, in memory only. Fails with
    /// [`Error::NotTracked`] if `name` was never subscribed. Does not touch
    /// the marker file — callers must follow up with [`Self::remove_marker`]
    /// once whatever filesystem change the removal represents has actually
    /// completed (§4.7 step 9: the marker is the last thing to go).
    pub fn forget(&mut self, name: &Name) -> Result<(), Error> {
        if self.tracked.remove(name).is_none() {
            return Err(Error::NotTracked(name.clone()));
        }
        Ok(())
    }

    /// Delete `name`'s marker file, if present. Idempotent: a missing
    /// marker is not an error.
    pub fn remove_marker(&self, root: impl AsRef<Path>, name: &Name) -> Result<(), Error> {
        let marker = root.as_ref().join(environment::TRACKED_BUNDLES_DIR).join(name.as_ref());
        match fs::remove_file(&marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(marker, e)),
        }
    }

    /// After a successful sync to a new MoM, bump every still-tracked
    /// bundle's recorded version to the one the MoM now publishes for it,
    /// persisting the updated marker immediately. Bundles no longer listed
    /// in the MoM are left untouched; removal is a separate, explicit
    /// operation. Unlike [`Self::subscribe`]/[`Self::persist`], this only
    /// ever touches bundles that were already tracked (and already had a
    /// marker) before this call, so there is no "claims installed but
    /// isn't yet" window to guard against here.
    pub fn set_versions_from_mom(&mut self, root: impl AsRef<Path>, mom: &Manifest) -> Result<(), Error> {
        for (name, version) in self.tracked.clone() {
            if let Some(pointer) = mom.pointer(&name) {
                if pointer.last_change != version {
                    self.subscribe(name.clone(), pointer.last_change);
                    self.persist(root.as_ref(), &name)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let subs = Subscriptions::load_tracked(dir.path()).unwrap();
        assert!(subs.is_empty());
    }

    #[test]
    fn subscribe_without_persist_writes_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut subs = Subscriptions::load_tracked(dir.path()).unwrap();

        subs.subscribe(Name::from("editors"), Version(3));

        assert!(subs.is_tracked(&Name::from("editors")));
        assert_eq!(subs.version_of(&Name::from("editors")), Some(Version(3)));
        assert!(!dir.path().join(environment::TRACKED_BUNDLES_DIR).join("editors").exists());
    }

    #[test]
    fn persist_writes_marker_for_tracked_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mut subs = Subscriptions::load_tracked(dir.path()).unwrap();

        subs.subscribe(Name::from("editors"), Version(3));
        subs.persist(dir.path(), &Name::from("editors")).unwrap();

        let reloaded = Subscriptions::load_tracked(dir.path()).unwrap();
        assert!(reloaded.is_tracked(&Name::from("editors")));
        assert_eq!(reloaded.version_of(&Name::from("editors")), Some(Version(3)));
    }

    #[test]
    fn persist_unknown_bundle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let subs = Subscriptions::load_tracked(dir.path()).unwrap();

        let err = subs.persist(dir.path(), &Name::from("editors"));
        assert!(matches!(err, Err(Error::NotTracked(_))));
    }

    #[test]
    fn forget_unknown_bundle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut subs = Subscriptions::load_tracked(dir.path()).unwrap();

        let err = subs.forget(&Name::from("editors"));
        assert!(matches!(err, Err(Error::NotTracked(_))));
    }

    #[test]
    fn forget_then_remove_marker_clears_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let mut subs = Subscriptions::load_tracked(dir.path()).unwrap();
        subs.subscribe(Name::from("editors"), Version(1));
        subs.persist(dir.path(), &Name::from("editors")).unwrap();

        subs.forget(&Name::from("editors")).unwrap();
        assert!(!subs.is_tracked(&Name::from("editors")));
        // Marker deletion is a separate, later step (§4.7 step 9).
        assert!(dir.path().join(environment::TRACKED_BUNDLES_DIR).join("editors").exists());

        subs.remove_marker(dir.path(), &Name::from("editors")).unwrap();
        assert!(!dir.path().join(environment::TRACKED_BUNDLES_DIR).join("editors").exists());
    }

    #[test]
    fn remove_marker_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let subs = Subscriptions::load_tracked(dir.path()).unwrap();
        subs.remove_marker(dir.path(), &Name::from("editors")).unwrap();
    }
}
