// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

/// Bundle name that is implicit on every system and can never be removed.
pub const OS_CORE: &str = "os-core";

/// Component name of the manifest of manifests.
pub const MOM_COMPONENT: &str = "MoM";

/// Default maximum number of attempts for a retried network fetch.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Default initial backoff, doubled (plus jitter) between attempts.
pub const DEFAULT_INITIAL_TIMEOUT_SECS: u64 = 1;

/// Upper bound on the uniform jitter added to each backoff, in milliseconds.
pub const RETRY_JITTER_MILLIS: u64 = 250;

/// Buffer size used when streaming a fetched file to disk, 16KiB.
pub const FILE_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Directory (relative to the state dir) holding staged file copies awaiting rename.
pub const STAGED_DIR: &str = "staged";
/// Directory (relative to the state dir) holding raw downloaded content, keyed by hash.
pub const DOWNLOAD_DIR: &str = "download";
/// Directory (relative to the state dir) reserved for delta-pack application (unused by this core).
pub const DELTA_DIR: &str = "delta";
/// Name of the rename journal written during the stager's commit phase.
pub const JOURNAL_NAME: &str = "journal";
/// Name of the process-wide exclusive lock file.
pub const LOCK_FILE: &str = "lock";

/// Directory (relative to the system root) holding one marker file per tracked bundle.
pub const TRACKED_BUNDLES_DIR: &str = "usr/share/clear/bundles";
/// Directory (relative to the system root) holding opaque post-install hook scripts.
pub const HOOKS_DIR: &str = "usr/share/strata/hooks";
