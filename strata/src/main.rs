// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::process::ExitCode;

/// Main entry point. Enters the single current-thread runtime once, runs
/// the requested bundle operation to completion, and maps any failure
/// onto the process exit code the front end contract promises.
fn main() -> ExitCode {
    env_logger::init();

    let _guard = strata::runtime::init();

    match strata::runtime::block_on(strata::cli::process()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
