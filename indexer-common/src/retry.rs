// This file is part of cosmos-indexer.
// Copyright (C) 2025 The cosmos-indexer authors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use log::warn;
use std::{error::Error as StdError, future::Future, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Run the given operation up to `max_retries` times, sleeping `2 * attempt`
/// seconds between attempts. Cancellation is observed before every attempt
/// and during the backoff sleep and aborts immediately.
pub async fn with_backoff<T, E, F, Fut>(
    label: &str,
    max_retries: u32,
    token: &CancellationToken,
    mut op: F,
) -> Result<T, Error<E>>
where
    E: StdError + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_retries = max_retries.max(1);
    let mut last_error = None;

    for attempt in 1..=max_retries {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),

            Err(error) => {
                warn!(label, attempt, max_retries, error:%; "retrying operation");
                last_error = Some(error);
            }
        }

        if attempt < max_retries {
            let backoff = Duration::from_secs(2 * attempt as u64);
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = sleep(backoff) => {}
            }
        }
    }

    // `last_error` is always set here: the loop runs at least once and only
    // falls through after a failed attempt.
    Err(Error::Exhausted(last_error.expect("at least one attempt was made")))
}

/// Error possibly returned by [with_backoff].
#[derive(Debug, Error)]
pub enum Error<E> {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation failed after all retries")]
    Exhausted(#[source] E),
}

impl<E> Error<E> {
    /// Whether this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
