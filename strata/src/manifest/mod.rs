// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The bundle/MoM data model: [`File`] entries, [`Manifest`] values, and the
//! consolidation/de-duplication pass that turns a set of bundle manifests
//! into a single per-path view.

use std::{cmp::Ordering, fmt};

use bitflags::bitflags;

pub mod loader;
pub mod wire;

/// Name of a bundle (or `"MoM"` for the root manifest).
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(String);

impl From<String> for Name {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for Name {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// OS release in which a manifest or file entry was published. Total order,
/// ascending.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u32);

impl From<u32> for Version {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Content digest of a [`File`] entry: 32 hex bytes, all-zero for deletion
/// tombstones.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HashParseError {
    #[error("expected 64 hex characters, got {0}")]
    WrongLength(usize),
    #[error("invalid hex digit")]
    InvalidHex(#[from] hex::FromHexError),
}

impl std::str::FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(HashParseError::WrongLength(s.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// What kind of filesystem entry a [`File`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Regular,
    Directory,
    Symlink,
    /// Only present in a MoM: points at a bundle's own manifest.
    ManifestPointer,
}

bitflags! {
    /// Per-entry behavioral flags, mirroring the teacher's package status
    /// [`Flags`](crate) bitflag pattern.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const NONE = 0;
        const IS_DELETED = 1 << 0;
        const DO_NOT_UPDATE = 1 << 1;
        const IS_CONFIG = 1 << 2;
        const IS_STATE = 1 << 3;
        const IS_BOOT = 1 << 4;
    }
}

/// A single path owned by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub path: String,
    pub hash: Hash,
    pub kind: Kind,
    pub flags: Flags,
    pub last_change: Version,
    /// Transient absolute path of the staged copy during an install.
    pub staging: Option<std::path::PathBuf>,
}

impl File {
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(Flags::IS_DELETED)
    }

    pub fn do_not_update(&self) -> bool {
        self.flags.contains(Flags::DO_NOT_UPDATE)
    }
}

/// A bundle (or MoM) at a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub component: Name,
    pub version: Version,
    pub files: Vec<File>,
    pub includes: Vec<Name>,
    /// Only populated for a MoM.
    pub manifests: Vec<File>,
}

impl Manifest {
    pub fn is_mom(&self) -> bool {
        self.component.as_ref() == crate::environment::MOM_COMPONENT
    }

    /// Names of every bundle listed in this MoM's pointer entries.
    pub fn bundle_names(&self) -> impl Iterator<Item = Name> + '_ {
        self.manifests.iter().map(|f| Name::from(f.path.trim_start_matches('/').to_owned()))
    }

    /// Find the pointer entry (and its hash/version) for `name` in a MoM.
    pub fn pointer(&self, name: &Name) -> Option<&File> {
        self.manifests
            .iter()
            .find(|f| f.path.trim_start_matches('/') == name.as_ref())
    }
}

/// Concatenate every submanifest's file list, preserving input order.
///
/// §4.5: `files_from`.
pub fn files_from<'a>(submanifests: impl IntoIterator<Item = &'a Manifest>) -> Vec<File> {
    submanifests.into_iter().flat_map(|m| m.files.clone()).collect()
}

/// Total order used by consolidation: `(path ASC, version DESC, is_deleted
/// ASC, hash ASC)`.
fn consolidation_order(a: &File, b: &File) -> Ordering {
    a.path
        .cmp(&b.path)
        .then_with(|| b.last_change.cmp(&a.last_change))
        .then_with(|| a.is_deleted().cmp(&b.is_deleted()))
        .then_with(|| a.hash.cmp(&b.hash))
}

/// Merge a flat file list into a single per-path view: sort, then keep the
/// first entry (highest version, non-deleted preferred, deterministic tie
/// break by hash) for each distinct path.
///
/// §4.5: `consolidate`.
pub fn consolidate(mut files: Vec<File>) -> Vec<File> {
    files.sort_by(consolidation_order);
    files.dedup_by(|a, b| a.path == b.path);
    files
}

/// Remove from `bundle_files` every entry whose path also appears in
/// `reference_files`. Both inputs must already be sorted ascending by path.
///
/// §4.5: `dedup`. Used during remove to protect files still owned by a
/// bundle that remains installed.
pub fn dedup(bundle_files: Vec<File>, reference_files: &[File]) -> Vec<File> {
    let mut reference = reference_files.iter().peekable();
    let mut retained = Vec::with_capacity(bundle_files.len());

    for file in bundle_files {
        while reference.peek().is_some_and(|r| r.path < file.path) {
            reference.next();
        }

        let owned_elsewhere = reference.peek().is_some_and(|r| r.path == file.path);
        if !owned_elsewhere {
            retained.push(file);
        }
    }

    retained
}
