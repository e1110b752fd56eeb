// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Top-level error type the CLI maps onto a process exit code. Every
//! component error surfaces through here so `main` only has one place
//! that translates a failure into the numeric codes `spec.md` §6 promises
//! the front end.

use thiserror::Error;

use crate::client;

/// Exit codes surfaced to the command-line front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Init = 1,
    CurrentVersion = 2,
    MomNotFound = 3,
    RecurseManifest = 4,
    BundleNotTracked = 5,
    BundleRemove = 6,
    BundleInstall = 7,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Install(#[from] client::install::Error),
    #[error("{0}")]
    Remove(#[from] client::remove::Error),
    #[error("{0}")]
    Context(#[from] client::Error),
}

impl Error {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Install(e) => install_exit_code(e),
            Error::Remove(e) => remove_exit_code(e),
            Error::Context(e) => context_exit_code(e),
        }
    }
}

fn context_exit_code(error: &client::Error) -> ExitCode {
    match error {
        client::Error::Session(_) => ExitCode::Init,
        client::Error::CurrentVersion(_) => ExitCode::CurrentVersion,
        client::Error::Mom(_) => ExitCode::MomNotFound,
        client::Error::Subscription(_) => ExitCode::BundleNotTracked,
    }
}

fn install_exit_code(error: &client::install::Error) -> ExitCode {
    match error {
        client::install::Error::Context(e) => context_exit_code(e),
        client::install::Error::Graph(_) => ExitCode::RecurseManifest,
        client::install::Error::Stage(_) => ExitCode::BundleInstall,
        client::install::Error::Subscription(_) => ExitCode::BundleNotTracked,
        client::install::Error::NothingToDo => ExitCode::BundleInstall,
    }
}

fn remove_exit_code(error: &client::remove::Error) -> ExitCode {
    match error {
        client::remove::Error::Context(e) => context_exit_code(e),
        client::remove::Error::Protected(_) | client::remove::Error::NotTracked(_) => ExitCode::BundleNotTracked,
        client::remove::Error::NotInMom(_) | client::remove::Error::StillRequired(_) => ExitCode::BundleRemove,
        client::remove::Error::Graph(_) => ExitCode::RecurseManifest,
        client::remove::Error::Subscription(_) => ExitCode::BundleNotTracked,
        client::remove::Error::Stage(_) => ExitCode::BundleRemove,
    }
}
