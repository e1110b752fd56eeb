// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::Path;

use clap::{arg, ArgMatches, Command};

use crate::{client, error::Error, manifest::Name};

pub fn command() -> Command {
    Command::new("install")
        .about("Install one or more bundles")
        .long_about("Install the requested bundles, and their transitive includes, to the local system")
        .arg(arg!(<NAME> ... "bundles to install").value_parser(clap::value_parser!(String)))
}

/// Handle execution of `strata install`
pub async fn handle(args: &ArgMatches, root: &Path) -> Result<(), Error> {
    let _yes_all = args.get_flag("yes");

    let names: Vec<Name> = args
        .get_many::<String>("NAME")
        .into_iter()
        .flatten()
        .map(|s| Name::from(s.as_str()))
        .collect();

    let mut ctx = client::open(root).map_err(Error::Context)?;

    let outcomes = client::install::install(&mut ctx, &names).await.map_err(Error::Install)?;

    for (name, outcome) in outcomes {
        match outcome {
            client::install::Outcome::Added => println!("{name}: installed"),
            client::install::Outcome::NoNew => println!("{name}: already installed"),
            client::install::Outcome::Failed => println!("{name}: not found in manifest of manifests, skipped"),
        }
    }

    Ok(())
}
