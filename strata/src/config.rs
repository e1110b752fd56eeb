// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    fmt,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::environment;

const EXTENSION: &str = "conf";

pub trait Config: DeserializeOwned {
    fn domain() -> String;

    fn merge(self, other: Self) -> Self;
}

pub fn load<T: Config>(root: impl AsRef<Path>) -> Option<T> {
    let domain = T::domain();

    [
        (Base::Vendor, Search::File),
        (Base::Vendor, Search::Directory),
        (Base::Admin, Search::File),
        (Base::Admin, Search::Directory),
    ]
    .into_iter()
    .flat_map(|(base, search)| enumerate_paths(search, &root, base, &domain))
    .filter_map(read_config)
    .reduce(T::merge)
}

pub fn save<T: Config + Serialize>(
    root: impl AsRef<Path>,
    name: impl fmt::Display,
    config: &T,
) -> Result<(), SaveError> {
    let domain = T::domain();

    let dir = domain_dir(root, Base::Admin, &domain);

    fs::create_dir_all(&dir).map_err(|io| SaveError::CreateDir(dir.clone(), io))?;

    let path = dir.join(format!("{name}.{EXTENSION}"));

    let serialized = serde_yaml::to_string(config)?;

    fs::write(&path, serialized).map_err(|io| SaveError::Write(path, io))?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("could not create config dir {0:?}: {1}")]
    CreateDir(PathBuf, io::Error),
    #[error("failed to serialize config as yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to write config file at {0:?}: {1}")]
    Write(PathBuf, io::Error),
}

fn enumerate_paths(
    search: Search,
    root: &impl AsRef<Path>,
    base: Base,
    domain: &str,
) -> Vec<PathBuf> {
    match search {
        Search::File => {
            let file = domain_file(root, base, domain);

            if file.exists() {
                vec![file]
            } else {
                vec![]
            }
        }
        Search::Directory => fs::read_dir(domain_dir(root, base, domain))
            .map(|read_dir| {
                read_dir
                    .into_iter()
                    .flatten()
                    .filter_map(|entry| {
                        let path = entry.path();
                        let extension = path
                            .extension()
                            .and_then(|ext| ext.to_str())
                            .unwrap_or_default();

                        if path.exists() && extension == EXTENSION {
                            Some(path)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn domain_file(root: impl AsRef<Path>, base: Base, domain: &str) -> PathBuf {
    root.as_ref()
        .join(base.path())
        .join("strata")
        .join(format!("{domain}.{EXTENSION}"))
}

fn domain_dir(root: impl AsRef<Path>, base: Base, domain: &str) -> PathBuf {
    root.as_ref()
        .join(base.path())
        .join("strata")
        .join(format!("{domain}.{EXTENSION}.d"))
}

fn read_config<T: Config>(path: PathBuf) -> Option<T> {
    let file = File::open(path).ok()?;
    serde_yaml::from_reader(file).ok()
}

#[derive(Clone, Copy)]
enum Base {
    Admin,
    Vendor,
}

impl Base {
    fn path(&self) -> &'static str {
        match self {
            Base::Admin => "etc",
            Base::Vendor => "usr/share",
        }
    }
}

enum Search {
    File,
    Directory,
}

/// Tuning knobs for the manifest loader's retry policy, layered from
/// `etc/strata/network.conf` over `usr/share/strata/network.conf`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Base URL of the bundle mirror; manifests and content live under it.
    #[serde(default = "default_mirror")]
    pub mirror: String,
    /// Maximum number of attempts before a fetch is considered exhausted.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    /// Initial backoff (seconds) before the first retry; doubled thereafter.
    #[serde(default = "default_initial_timeout")]
    pub initial_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mirror: default_mirror(),
            max_tries: default_max_tries(),
            initial_timeout_secs: default_initial_timeout(),
        }
    }
}

fn default_mirror() -> String {
    "https://mirror.invalid/strata".into()
}

fn default_max_tries() -> u32 {
    environment::DEFAULT_MAX_TRIES
}

fn default_initial_timeout() -> u64 {
    environment::DEFAULT_INITIAL_TIMEOUT_SECS
}

impl Config for NetworkConfig {
    fn domain() -> String {
        "network".into()
    }

    fn merge(self, other: Self) -> Self {
        // Later (more specific) entries win outright; there's nothing
        // sensible to merge field-by-field for retry tuning.
        other
    }
}

/// Load the network config for `root`, falling back to defaults if none is present.
pub fn network_config(root: impl AsRef<Path>) -> NetworkConfig {
    load::<NetworkConfig>(root).unwrap_or_default()
}

/// Glob patterns (relative to the installation root) of paths the stager
/// must never touch, layered like [`NetworkConfig`] but merged by union
/// rather than override: an admin fragment only ever adds exclusions on
/// top of the vendor-provided defaults, it never removes one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Config for IgnoreConfig {
    fn domain() -> String {
        "ignore".into()
    }

    fn merge(self, other: Self) -> Self {
        let mut patterns = self.patterns;
        patterns.extend(other.patterns);
        Self { patterns }
    }
}

impl IgnoreConfig {
    /// The "global ignore predicate" `spec.md` §4.6 treats as a given:
    /// true if `path` matches any configured glob.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .filter_map(|pattern| glob::Pattern::new(pattern).ok())
            .any(|pattern| pattern.matches(path))
    }
}

/// Load the ignore-glob config for `root`, falling back to an empty set.
pub fn ignore_config(root: impl AsRef<Path>) -> IgnoreConfig {
    load::<IgnoreConfig>(root).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = network_config(dir.path());
        assert_eq!(config.max_tries, environment::DEFAULT_MAX_TRIES);
    }

    #[test]
    fn admin_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let admin_dir = dir.path().join("etc").join("strata");
        fs::create_dir_all(&admin_dir).unwrap();
        fs::write(admin_dir.join("network.conf"), "max_tries: 7\ninitial_timeout_secs: 2\n").unwrap();

        let config = network_config(dir.path());
        assert_eq!(config.max_tries, 7);
        assert_eq!(config.initial_timeout_secs, 2);
    }

    #[test]
    fn ignore_patterns_union_across_layers() {
        let dir = tempfile::tempdir().unwrap();
        let vendor_dir = dir.path().join("usr/share/strata");
        let admin_dir = dir.path().join("etc/strata");
        fs::create_dir_all(&vendor_dir).unwrap();
        fs::create_dir_all(&admin_dir).unwrap();
        fs::write(vendor_dir.join("ignore.conf"), "patterns:\n  - /etc/fstab\n").unwrap();
        fs::write(admin_dir.join("ignore.conf"), "patterns:\n  - /etc/resolv.conf\n").unwrap();

        let config = ignore_config(dir.path());
        assert!(config.matches("/etc/fstab"));
        assert!(config.matches("/etc/resolv.conf"));
        assert!(!config.matches("/usr/bin/ed"));
    }

    #[test]
    fn empty_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = ignore_config(dir.path());
        assert!(!config.matches("/usr/bin/ed"));
    }
}
