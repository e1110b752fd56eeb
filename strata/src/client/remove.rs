// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use thiserror::Error;

use crate::{
    client::{self, BundleContext},
    environment, graph,
    manifest::{self, dedup, files_from, Name},
    stage,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("bundle context: {0}")]
    Context(#[from] client::Error),
    #[error("{0} is the implicit base bundle and cannot be removed")]
    Protected(Name),
    #[error("{0} is not tracked on this system")]
    NotTracked(Name),
    #[error("{0} is not listed in the current manifest of manifests")]
    NotInMom(Name),
    #[error("{0} is still required by another installed bundle")]
    StillRequired(Name),
    #[error("resolving manifest graph: {0}")]
    Graph(#[from] graph::Error),
    #[error("tracking subscriptions: {0}")]
    Subscription(#[from] crate::subscription::Error),
    #[error("unstaging content: {0}")]
    Stage(#[from] stage::Error),
}

/// Remove `name` from the installation: unsubscribe it, then unlink every
/// file it owns that isn't also owned by a bundle that remains installed.
pub async fn remove(ctx: &mut BundleContext, name: &Name) -> Result<(), Error> {
    if client::is_protected(name) {
        return Err(Error::Protected(name.clone()));
    }
    if !ctx.subscriptions.is_tracked(name) {
        return Err(Error::NotTracked(name.clone()));
    }

    let mom = client::current_mom(ctx).await.map_err(client::Error::from)?;
    if mom.pointer(name).is_none() {
        return Err(Error::NotInMom(name.clone()));
    }

    let root = ctx.session.installation.root.clone();

    // In-memory only: the marker file stays on disk until the unlink loop
    // below actually succeeds (§4.7 step 9), so a failure partway through
    // never leaves `is_tracked` lying about what's still on disk.
    ctx.subscriptions.forget(name)?;
    ctx.subscriptions.set_versions_from_mom(&root, &mom)?;

    let remaining_tracked: Vec<Name> = ctx.subscriptions.names().cloned().collect();
    let remaining = graph::recurse(&ctx.loader, &mom, graph::Roots::All(&remaining_tracked)).await?;

    if remaining.iter().any(|m| m.includes.contains(name)) {
        // Put the subscription back in memory; we're aborting the whole
        // operation and its marker was never touched.
        if let Some(pointer) = mom.pointer(name) {
            ctx.subscriptions.subscribe(name.clone(), pointer.last_change);
        }
        return Err(Error::StillRequired(name.clone()));
    }

    let mut retain_set = manifest::consolidate(files_from(&remaining));
    retain_set.sort_by(|a, b| a.path.cmp(&b.path));

    let to_remove = graph::recurse(&ctx.loader, &mom, graph::Roots::Single(name)).await?;
    let mut removal_files = files_from(&to_remove);
    removal_files.sort_by(|a, b| a.path.cmp(&b.path));

    let surviving = dedup(removal_files, &retain_set);

    for file in &surviving {
        stage::unstage(&root, file).await?;
    }

    stage::sync();

    // Canonical commit point: the marker is the last thing to go, only
    // after every file this bundle alone owned has actually been unlinked.
    ctx.subscriptions.remove_marker(&root, name)?;

    stage::run_hooks(&root, "post-remove");

    Ok(())
}

pub fn is_removable(name: &Name) -> bool {
    name.as_ref() != environment::OS_CORE
}
