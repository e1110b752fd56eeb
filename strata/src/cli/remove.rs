// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::Path;

use clap::{arg, ArgMatches, Command};

use crate::{client, error::Error, manifest::Name};

pub fn command() -> Command {
    Command::new("remove")
        .about("Remove an installed bundle")
        .long_about("Remove a bundle by name, unless another installed bundle still requires it")
        .arg(arg!(<NAME> "bundle to remove").value_parser(clap::value_parser!(String)))
}

/// Handle execution of `strata remove`
pub async fn handle(args: &ArgMatches, root: &Path) -> Result<(), Error> {
    let _yes_all = args.get_flag("yes");

    let name = Name::from(args.get_one::<String>("NAME").expect("required").as_str());

    let mut ctx = client::open(root).map_err(Error::Context)?;

    client::remove::remove(&mut ctx, &name).await.map_err(Error::Remove)?;

    println!("{name}: removed");

    Ok(())
}
