// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};

use crate::error::Error;

mod completions;
mod install;
mod list;
mod remove;
mod version;

/// Generate the CLI command structure
fn command() -> Command {
    Command::new("strata")
        .about("Bundle lifecycle core of the system updater")
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("root")
                .short('D')
                .long("directory")
                .global(true)
                .help("Root of the installation to operate against")
                .action(ArgAction::Set)
                .default_value("/"),
        )
        .arg(
            Arg::new("yes")
                .short('y')
                .long("yes-all")
                .global(true)
                .help("Assume yes for all questions")
                .action(ArgAction::SetTrue),
        )
        .arg_required_else_help(true)
        .subcommand(completions::command())
        .subcommand(install::command())
        .subcommand(list::command())
        .subcommand(remove::command())
        .subcommand(version::command())
}

/// Process all CLI arguments
pub async fn process() -> Result<(), Error> {
    let matches = command().get_matches();

    if matches.get_flag("version") {
        version::print();
        return Ok(());
    }

    let root = PathBuf::from(matches.get_one::<String>("root").expect("has default"));

    match matches.subcommand() {
        Some(("completions", args)) => {
            completions::handle(args, command());
            Ok(())
        }
        Some(("install", args)) => install::handle(args, &root).await,
        Some(("list", args)) => list::handle(args, &root).await,
        Some(("remove", args)) => remove::handle(args, &root).await,
        Some(("version", _)) => {
            version::print();
            Ok(())
        }
        _ => unreachable!(),
    }
}
