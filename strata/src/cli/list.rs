// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::Path;

use clap::{ArgMatches, Command};

use crate::{client, error::Error};

pub fn command() -> Command {
    Command::new("list").about("List bundles advertised by the current manifest of manifests")
}

/// Handle execution of `strata list`
pub async fn handle(_args: &ArgMatches, root: &Path) -> Result<(), Error> {
    let ctx = client::open(root).map_err(Error::Context)?;

    for name in client::list(&ctx).await.map_err(Error::Context)? {
        println!("{name}");
    }

    Ok(())
}
