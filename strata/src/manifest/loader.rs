// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Fetches and parses manifests by version/name, retrying transient network
//! failures per [`crate::request::fetch`]'s policy.

use std::str::FromStr;

use thiserror::Error;

use crate::{
    config::NetworkConfig,
    environment,
    manifest::{wire, Hash, Manifest, Name, Version},
    request,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("fetching manifest: {0}")]
    Fetch(#[from] request::Error),
    #[error("parsing manifest: {0}")]
    Parse(#[from] wire::Error),
    #[error("manifest hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },
    #[error("signature verification failed for {0}")]
    Signature(Name),
}

pub struct ManifestLoader {
    config: NetworkConfig,
    version: Version,
}

impl ManifestLoader {
    pub fn new(config: NetworkConfig, version: Version) -> Self {
        Self { config, version }
    }

    /// Fetch the manifest of manifests for `version`, verify its
    /// signature, and parse it. Retries are handled by [`request::fetch`];
    /// a caller that exhausts the retry budget should surface
    /// `EMOM_NOTFOUND`.
    pub async fn load_mom(&self, version: Version) -> Result<Manifest, Error> {
        let url = format!("{}/{}/{}", self.config.mirror, version, environment::MOM_COMPONENT);
        let bytes = request::fetch(&url, &self.config).await?;

        verify_signature(&Name::from(environment::MOM_COMPONENT))?;

        Ok(wire::parse(Name::from(environment::MOM_COMPONENT), &bytes)?)
    }

    /// Fetch a bundle manifest, verifying its content hash against the
    /// pointer entry the caller already resolved from the MoM before
    /// parsing it.
    pub async fn load_sub(&self, version: Version, name: &Name, expected_hash: &Hash) -> Result<Manifest, Error> {
        let url = format!("{}/{}/manifests/{}", self.config.mirror, version, name);
        let bytes = request::fetch(&url, &self.config).await?;

        let actual = hash_of(&bytes);
        if actual != *expected_hash {
            return Err(Error::HashMismatch {
                expected: *expected_hash,
                actual,
            });
        }

        verify_signature(name)?;

        Ok(wire::parse(name.clone(), &bytes)?)
    }

    pub fn current_version(&self) -> Version {
        self.version
    }
}

fn hash_of(bytes: &[u8]) -> Hash {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    Hash::from_str(&hex::encode(digest)).unwrap_or(Hash::ZERO)
}

/// Stand-in for the real signature-verification collaborator, out of
/// scope for this core: `spec.md` treats it as a pure external function
/// with no key material specified.
fn verify_signature(_component: &Name) -> Result<(), Error> {
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_of_matches_sha256() {
        let hash = hash_of(b"hello world");
        assert_eq!(
            hash.to_string(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
