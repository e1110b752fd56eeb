// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Thin async HTTP fetch wrapper, with retry-with-backoff baked in so every
//! caller (MoM loader, submanifest loader, stager) gets the same policy.

use std::{sync::LazyLock, time::Duration};

use bytes::Bytes;
use rand::Rng;
use thiserror::Error;
use url::Url;

use crate::config::NetworkConfig;

/// Shared client for tcp socket reuse and connection limit.
static CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::ClientBuilder::new()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("build reqwest client")
});

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request to {0} failed after {1} attempt(s): {2}")]
    Exhausted(Url, u32, #[source] reqwest::Error),
}

/// Fetch the full response body of `url`, retrying transient failures
/// (network errors and server 5xx responses) up to `config.max_tries`
/// times. Backoff doubles from `config.initial_timeout_secs` each attempt
/// and is perturbed by up to [`crate::environment::RETRY_JITTER_MILLIS`]
/// of jitter so that many clients retrying the same outage don't
/// resynchronize on each other.
pub async fn fetch(url: &str, config: &NetworkConfig) -> Result<Bytes, Error> {
    let url: Url = url.parse()?;

    let mut attempt = 0;
    let mut last_error = None;

    while attempt < config.max_tries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt, config.initial_timeout_secs)).await;
        }
        attempt += 1;

        match try_once(&url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if is_retryable(&e) => last_error = Some(e),
            Err(e) => return Err(Error::Exhausted(url, attempt, e)),
        }
    }

    Err(Error::Exhausted(url, attempt, last_error.expect("at least one attempt made")))
}

async fn try_once(url: &Url) -> Result<Bytes, reqwest::Error> {
    CLIENT.get(url.clone()).send().await?.error_for_status()?.bytes().await
}

fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.status().is_some_and(|s| s.is_server_error())
}

fn backoff_delay(attempt: u32, initial_timeout_secs: u64) -> Duration {
    let base = initial_timeout_secs.saturating_mul(1u64 << (attempt - 1).min(16));
    let jitter = rand::thread_rng().gen_range(0..=crate::environment::RETRY_JITTER_MILLIS);
    Duration::from_secs(base) + Duration::from_millis(jitter)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt() {
        let first = backoff_delay(1, 1).as_millis();
        let second = backoff_delay(2, 1).as_millis();
        assert!(second >= first + 1000 - crate::environment::RETRY_JITTER_MILLIS as u128);
    }
}
