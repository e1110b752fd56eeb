// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashSet;

use log::warn;
use thiserror::Error;

use crate::{
    client::{self, BundleContext},
    environment, graph,
    manifest::{self, files_from, Manifest, Name},
    stage,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("bundle context: {0}")]
    Context(#[from] client::Error),
    #[error("resolving manifest graph: {0}")]
    Graph(#[from] graph::Error),
    #[error("staging content: {0}")]
    Stage(#[from] stage::Error),
    #[error("tracking subscriptions: {0}")]
    Subscription(#[from] crate::subscription::Error),
    #[error("every requested bundle is already tracked; nothing to install")]
    NothingToDo,
}

/// Per-bundle result of [`add_subscriptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Newly subscribed (wasn't tracked before this call).
    Added,
    /// Already tracked; nothing to do.
    NoNew,
    /// `name` is not listed in the MoM; skipped with a warning, not fatal.
    Failed,
}

/// Install `names` (and their transitive `includes`) against the given
/// context. Returns an error only for conditions that stop the whole
/// operation (graph resolution, content staging); an unknown bundle name
/// among `names` is reported via [`Outcome::Failed`] and does not abort
/// the rest.
pub async fn install(ctx: &mut BundleContext, names: &[Name]) -> Result<Vec<(Name, Outcome)>, Error> {
    let mom = client::current_mom(ctx).await.map_err(client::Error::from)?;

    let outcomes = add_subscriptions(ctx, names, &mom).await?;

    // §4.7 step 3 / §8 scenario 3: every requested bundle already tracked
    // is not success, it's a no-op that must be surfaced as such.
    if outcomes.iter().all(|(_, o)| *o != Outcome::Added) {
        return Err(Error::NothingToDo);
    }

    let root_for_versions = client::root_path(ctx).to_path_buf();
    ctx.subscriptions.set_versions_from_mom(root_for_versions, &mom)?;

    let tracked: Vec<Name> = ctx.subscriptions.names().cloned().collect();
    let to_install = graph::recurse(&ctx.loader, &mom, graph::Roots::All(&tracked)).await?;
    let to_install_files = manifest::consolidate(files_from(&to_install));

    let state_dir = ctx.session.installation.state_dir();
    let root = ctx.session.installation.root.clone();

    let _ = std::fs::remove_dir_all(ctx.session.installation.download_dir());
    std::fs::create_dir_all(ctx.session.installation.download_dir()).ok();

    // §4.6 step 1: a file is neither staged nor committed if it's a
    // deletion tombstone, is flagged `do_not_update`, or matches the
    // installation's configured ignore globs. `to_install_files` itself
    // stays intact (unfiltered) so `repair_path` can still resolve parent
    // directories skipped files may still need.
    let skip = |file: &manifest::File| file.is_deleted() || file.do_not_update() || ctx.session.ignore.matches(&file.path);

    for file in to_install_files.iter().filter(|f| !skip(f)) {
        stage::stage(&state_dir, file, &to_install_files, &ctx.session.network).await?;
    }

    let committable: Vec<manifest::File> = to_install_files.iter().filter(|f| !skip(f)).cloned().collect();

    stage::commit(&state_dir, &root, &committable).await?;

    // §4.7 step 8: the tracked-bundle marker is only durable once the
    // files it vouches for have actually been renamed into place. Persist
    // it here, the canonical commit point, rather than when the in-memory
    // subscription was first recorded.
    for (name, outcome) in &outcomes {
        if *outcome == Outcome::Added {
            ctx.subscriptions.persist(&root, name)?;
        }
    }

    stage::sync();
    stage::run_hooks(&root, "post-install");

    Ok(outcomes)
}

/// Recursively subscribe `names`, pulling in each bundle's own `includes`
/// first so a dependency is always tracked before its dependent.
async fn add_subscriptions(ctx: &mut BundleContext, names: &[Name], mom: &Manifest) -> Result<Vec<(Name, Outcome)>, Error> {
    let mut results = Vec::new();
    let mut seen = HashSet::new();

    for name in names {
        add_one(ctx, name, mom, &mut seen, &mut results).await?;
    }

    Ok(results)
}

fn add_one<'a>(
    ctx: &'a mut BundleContext,
    name: &'a Name,
    mom: &'a Manifest,
    seen: &'a mut HashSet<Name>,
    results: &'a mut Vec<(Name, Outcome)>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + 'a>> {
    Box::pin(async move {
        if !seen.insert(name.clone()) {
            return Ok(());
        }

        let Some(pointer) = mom.pointer(name) else {
            warn!("bundle {name} is not listed in the manifest of manifests; skipping");
            results.push((name.clone(), Outcome::Failed));
            return Ok(());
        };

        if ctx.subscriptions.is_tracked(name) {
            results.push((name.clone(), Outcome::NoNew));
            return Ok(());
        }

        let bundle = ctx
            .loader
            .load_sub(mom.version, name, &pointer.hash)
            .await
            .map_err(|e| Error::Context(client::Error::Mom(e)))?;

        for include in &bundle.includes {
            add_one(ctx, include, mom, seen, results).await?;
        }

        // In-memory only: the marker file is written later, at the commit
        // point in `install()`, once staging has actually succeeded.
        ctx.subscriptions.subscribe(name.clone(), pointer.last_change);
        results.push((name.clone(), Outcome::Added));

        Ok(())
    })
}

/// Non-spec-naming convenience for the CLI and tests: the `"os-core"`
/// bundle can be implicitly present without ever going through
/// `add_subscriptions`, so installs never need to special-case it here.
pub fn implicit_bundles() -> &'static [&'static str] {
    &[environment::OS_CORE]
}

#[cfg(test)]
mod test {
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        client::support::{content_hash, open_context, write_mirror_config},
        manifest::{wire, File as ManifestFile, Flags, Hash, Kind, Version},
    };

    #[test]
    fn outcome_equality() {
        assert_eq!(Outcome::Added, Outcome::Added);
        assert_ne!(Outcome::Added, Outcome::NoNew);
    }

    fn pointer(name: &str, hash: Hash) -> ManifestFile {
        ManifestFile {
            path: name.to_owned(),
            hash,
            kind: Kind::ManifestPointer,
            flags: Flags::NONE,
            last_change: Version(10),
            staging: None,
        }
    }

    fn regular(path: &str, hash: Hash) -> ManifestFile {
        ManifestFile {
            path: path.to_owned(),
            hash,
            kind: Kind::Regular,
            flags: Flags::NONE,
            last_change: Version(10),
            staging: None,
        }
    }

    async fn mount_manifest(server: &MockServer, route: &str, manifest: &Manifest) -> Vec<u8> {
        let bytes = wire::write(manifest).into_bytes();
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
            .mount(server)
            .await;
        bytes
    }

    async fn mount_content(server: &MockServer, hash: Hash, bytes: &'static [u8]) {
        Mock::given(method("GET"))
            .and(path(format!("/content/{hash}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn install_single_new_bundle_stages_files_and_persists_marker() {
        let root = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;

        let h_ed = content_hash(b"ed-binary");
        let editors = Manifest {
            component: Name::from("editors"),
            version: Version(10),
            files: vec![regular("/usr/bin/ed", h_ed)],
            includes: vec![],
            manifests: vec![],
        };
        let editors_bytes = mount_manifest(&server, "/10/manifests/editors", &editors).await;
        let editors_hash = content_hash(&editors_bytes);

        let mom = Manifest {
            component: Name::from("MoM"),
            version: Version(10),
            files: vec![],
            includes: vec![],
            manifests: vec![pointer("editors", editors_hash)],
        };
        mount_manifest(&server, "/10/MoM", &mom).await;
        mount_content(&server, h_ed, b"ed-binary").await;

        write_mirror_config(root.path(), &server.uri());
        let mut ctx = open_context(root.path(), Version(10));

        let outcomes = install(&mut ctx, &[Name::from("editors")]).await.unwrap();

        assert_eq!(outcomes, vec![(Name::from("editors"), Outcome::Added)]);
        assert!(root.path().join("usr/bin/ed").exists());
        assert!(root
            .path()
            .join(crate::environment::TRACKED_BUNDLES_DIR)
            .join("editors")
            .exists());
    }

    #[tokio::test]
    async fn install_already_tracked_bundle_errors_nothing_to_do() {
        let root = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;

        let mom = Manifest {
            component: Name::from("MoM"),
            version: Version(10),
            files: vec![],
            includes: vec![],
            manifests: vec![pointer("editors", Hash([7; 32]))],
        };
        mount_manifest(&server, "/10/MoM", &mom).await;

        write_mirror_config(root.path(), &server.uri());
        let marker_dir = root.path().join(crate::environment::TRACKED_BUNDLES_DIR);
        std::fs::create_dir_all(&marker_dir).unwrap();
        std::fs::write(marker_dir.join("editors"), "10").unwrap();

        let mut ctx = open_context(root.path(), Version(10));

        let err = install(&mut ctx, &[Name::from("editors")]).await.unwrap_err();

        assert!(matches!(err, Error::NothingToDo));
        let staged = std::fs::read_dir(ctx.session.installation.staged_dir()).unwrap();
        assert_eq!(staged.count(), 0);
    }

    #[tokio::test]
    async fn install_with_include_subscribes_and_stages_both() {
        let root = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;

        let h_ed = content_hash(b"ed-binary");
        let h_gdb = content_hash(b"gdb-binary");

        let editors = Manifest {
            component: Name::from("editors"),
            version: Version(10),
            files: vec![regular("/usr/bin/ed", h_ed)],
            includes: vec![],
            manifests: vec![],
        };
        let editors_bytes = mount_manifest(&server, "/10/manifests/editors", &editors).await;
        let editors_hash = content_hash(&editors_bytes);

        let devtools = Manifest {
            component: Name::from("devtools"),
            version: Version(10),
            files: vec![regular("/usr/bin/gdb", h_gdb)],
            includes: vec![Name::from("editors")],
            manifests: vec![],
        };
        let devtools_bytes = mount_manifest(&server, "/10/manifests/devtools", &devtools).await;
        let devtools_hash = content_hash(&devtools_bytes);

        let mom = Manifest {
            component: Name::from("MoM"),
            version: Version(10),
            files: vec![],
            includes: vec![],
            manifests: vec![pointer("editors", editors_hash), pointer("devtools", devtools_hash)],
        };
        mount_manifest(&server, "/10/MoM", &mom).await;
        mount_content(&server, h_ed, b"ed-binary").await;
        mount_content(&server, h_gdb, b"gdb-binary").await;

        write_mirror_config(root.path(), &server.uri());
        let mut ctx = open_context(root.path(), Version(10));

        let outcomes = install(&mut ctx, &[Name::from("devtools")]).await.unwrap();

        assert!(outcomes.contains(&(Name::from("editors"), Outcome::Added)));
        assert!(outcomes.contains(&(Name::from("devtools"), Outcome::Added)));
        assert!(root.path().join("usr/bin/ed").exists());
        assert!(root.path().join("usr/bin/gdb").exists());
        for name in ["editors", "devtools"] {
            assert!(root
                .path()
                .join(crate::environment::TRACKED_BUNDLES_DIR)
                .join(name)
                .exists());
        }
    }
}
