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

use crate::domain::{self, Block, Transaction, node::Node, storage::Storage};
use fastrace::{Span, future::FutureExt, prelude::SpanContext, trace};
use indexer_common::{error::BoxError, retry};
use indicatif::ProgressBar;
use log::{error, info};
use serde::Deserialize;
use serde_json::Value;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// First block height to extract; 0 resolves to the latest stored height
    /// plus one, or 1 for an empty store.
    #[serde(default)]
    pub start: u64,

    /// Last block height to extract (inclusive); 0 resolves to the latest
    /// height on the node.
    #[serde(default)]
    pub stop: u64,

    /// Poll the node for new blocks instead of stopping at a fixed height.
    #[serde(default)]
    pub live: bool,

    /// Rewrite all blocks from the earliest stored height to the latest height
    /// on the node.
    #[serde(default)]
    pub reindex: bool,

    /// Live mode poll interval in seconds.
    #[serde(default = "default_block_time")]
    pub block_time: u64,

    /// Worker pool size; also sizes the storage connection pool.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retry budget for a single block and for individual node queries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Config {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.live && self.stop != 0 {
            return Err(InvalidConfig(
                "live mode cannot be combined with an explicit stop height".to_string(),
            ));
        }

        if self.max_concurrency == 0 {
            return Err(InvalidConfig("max_concurrency must be positive".to_string()));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start: 0,
            stop: 0,
            live: false,
            reindex: false,
            block_time: default_block_time(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_block_time() -> u64 {
    2
}

fn default_max_concurrency() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

/// Resolve the effective block range, fill gaps if applicable, then extract
/// either the resolved range or live-tail the chain.
pub async fn run<N, S>(
    config: Config,
    node: N,
    storage: S,
    token: CancellationToken,
) -> Result<(), Error>
where
    N: Node,
    S: Storage,
{
    let Config {
        start,
        stop,
        live,
        reindex,
        block_time,
        max_concurrency,
        max_retries,
    } = config;

    let auto_range = start == 0 && stop == 0;

    let extractor = Extractor {
        node,
        storage,
        max_concurrency,
        max_retries,
        token,
    };

    let mut start = start;
    let mut stop = stop;

    if reindex {
        // TODO: prefer the earliest block the node itself can still serve once
        // that query is wired up; until then the earliest stored height is the
        // lower bound.
        start = extractor.earliest_stored_height().await?.unwrap_or(1);
        stop = 0;
    }

    if start == 0 {
        start = extractor
            .latest_stored_height()
            .await?
            .map(|height| height + 1)
            .unwrap_or(1);
    }

    if auto_range && !reindex {
        extractor.fill_gaps().await?;
    }

    if live {
        info!(start, block_time; "starting live extraction");
        extractor
            .extract_live(start, Duration::from_secs(block_time))
            .await
    } else {
        if stop == 0 {
            stop = extractor.latest_height().await?;
        }

        if start > stop {
            if auto_range {
                info!(start, stop; "store is up to date");
                return Ok(());
            }

            return Err(Error::InvalidRange { start, stop });
        }

        info!(start, stop; "starting extraction");
        extractor.extract_range(start, stop).await
    }
}

/// The control loop: owns the worker pool and the cancellation discipline.
#[derive(Clone)]
struct Extractor<N, S> {
    node: N,
    storage: S,
    max_concurrency: usize,
    max_retries: u32,
    token: CancellationToken,
}

impl<N, S> Extractor<N, S>
where
    N: Node,
    S: Storage,
{
    /// Extract the closed range `[start, stop]` with bounded concurrency.
    async fn extract_range(&self, start: u64, stop: u64) -> Result<(), Error> {
        if start == stop {
            info!(height = start; "extracting blocks and transactions");
        } else {
            info!(start, stop; "extracting blocks and transactions");
        }

        self.extract_heights(start..=stop, stop - start + 1).await
    }

    /// Poll the node for its latest height and extract any newly produced
    /// blocks, forever.
    async fn extract_live(&self, start: u64, block_time: Duration) -> Result<(), Error> {
        // The first processed range must include `start`.
        let mut current_height = start.max(1) - 1;

        loop {
            if self.token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let latest_height = self.latest_height().await?;

            if latest_height > current_height {
                self.extract_range(current_height + 1, latest_height)
                    .await?;
                current_height = latest_height;
            }

            tokio::select! {
                _ = self.token.cancelled() => return Err(Error::Cancelled),
                _ = sleep(block_time) => {}
            }
        }
    }

    /// Write all heights absent between the lowest and highest stored block,
    /// using the same per-height pipeline as normal extraction.
    async fn fill_gaps(&self) -> Result<(), Error> {
        let missing = self
            .storage
            .get_missing_heights()
            .await
            .map_err(|error| Error::Storage(error.into()))?;

        if missing.is_empty() {
            return Ok(());
        }

        info!(count = missing.len(); "filling gaps in stored blocks");
        let total = missing.len() as u64;
        self.extract_heights(missing, total).await
    }

    /// Dispatch the given heights to the worker pool in order. Completions may
    /// be out of order; the first fatal worker error cancels the group and is
    /// surfaced after all in-flight workers have drained.
    async fn extract_heights(
        &self,
        heights: impl IntoIterator<Item = u64>,
        total: u64,
    ) -> Result<(), Error> {
        let progress = (total > 1).then(|| ProgressBar::new(total));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut workers = JoinSet::new();
        let mut first_error = None;

        for height in heights {
            if self.token.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                _ = self.token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("semaphore is never closed")
                }
            };

            if height % 5_000 == 0 {
                info!(height; "still processing blocks");
            }

            let extractor = self.clone();
            let progress = progress.clone();

            workers.spawn(async move {
                let _permit = permit;

                let result = extractor
                    .process_height_with_retry(height)
                    .in_span(Span::root("process-block", SpanContext::random()))
                    .await;

                match &result {
                    Ok(()) => {
                        if let Some(progress) = &progress {
                            progress.inc(1);
                        }
                    }

                    Err(Error::Cancelled) => {}

                    Err(error) => {
                        error!(height, error:%; "cannot process block");
                        extractor.token.cancel();
                    }
                }

                result
            });

            // Keep the set of completed workers drained while dispatching.
            while let Some(result) = workers.try_join_next() {
                self.record(result, &mut first_error);
            }
        }

        while let Some(result) = workers.join_next().await {
            self.record(result, &mut first_error);
        }

        if let Some(progress) = progress {
            progress.finish();
        }

        match first_error {
            Some(error) => Err(error),
            None if self.token.is_cancelled() => Err(Error::Cancelled),
            None => Ok(()),
        }
    }

    fn record(
        &self,
        result: Result<Result<(), Error>, tokio::task::JoinError>,
        first_error: &mut Option<Error>,
    ) {
        match result {
            Ok(Ok(())) | Ok(Err(Error::Cancelled)) => {}

            Ok(Err(error)) => {
                if first_error.is_none() {
                    *first_error = Some(error);
                }
            }

            Err(error) => {
                self.token.cancel();
                if first_error.is_none() {
                    *first_error = Some(Error::Join(error));
                }
            }
        }
    }

    async fn process_height_with_retry(&self, height: u64) -> Result<(), Error> {
        let result = retry::with_backoff("process block", self.max_retries, &self.token, || {
            self.process_height(height)
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(retry::Error::Cancelled) | Err(retry::Error::Exhausted(BlockError::Cancelled)) => {
                Err(Error::Cancelled)
            }
            Err(retry::Error::Exhausted(error)) => Err(Error::ProcessBlock {
                height,
                source: error.into(),
            }),
        }
    }

    /// The per-height pipeline: fetch the block, resolve and fetch all of its
    /// transactions, then write block and transactions through a single
    /// storage call.
    #[trace]
    async fn process_height(&self, height: u64) -> Result<(), BlockError> {
        let block_json = cancellable(&self.token, self.node.fetch_block(height))
            .await
            .ok_or(BlockError::Cancelled)?
            .map_err(|error| BlockError::FetchBlock(error.into()))?;

        let block_value =
            serde_json::from_slice::<Value>(&block_json).map_err(BlockError::ParseBlock)?;

        let mut transactions = Vec::new();
        for tx in domain::block_transactions(&block_value) {
            let tx_bytes = domain::decode_transaction(tx).map_err(BlockError::DecodeTransaction)?;
            let hash = domain::transaction_hash(&tx_bytes);

            let tx_json = cancellable(&self.token, self.node.fetch_transaction(&hash))
                .await
                .ok_or(BlockError::Cancelled)?
                .map_err(|error| BlockError::FetchTransaction {
                    hash: hash.clone(),
                    source: error.into(),
                })?;

            transactions.push(Transaction {
                hash,
                data: tx_json,
            });
        }

        // A write that has begun is drained, not aborted; but no new write
        // starts once cancelled.
        if self.token.is_cancelled() {
            return Err(BlockError::Cancelled);
        }

        let block = Block {
            height,
            data: block_json,
        };
        self.storage
            .write_block_with_transactions(&block, &transactions)
            .await
            .map_err(|error| BlockError::Write(error.into()))?;

        Ok(())
    }

    async fn latest_height(&self) -> Result<u64, Error> {
        cancellable(&self.token, self.node.latest_height())
            .await
            .ok_or(Error::Cancelled)?
            .map_err(|error| {
                if self.token.is_cancelled() {
                    Error::Cancelled
                } else {
                    Error::Node(error.into())
                }
            })
    }

    async fn latest_stored_height(&self) -> Result<Option<u64>, Error> {
        self.storage
            .get_latest_height()
            .await
            .map_err(|error| Error::Storage(error.into()))
    }

    async fn earliest_stored_height(&self) -> Result<Option<u64>, Error> {
        self.storage
            .get_earliest_height()
            .await
            .map_err(|error| Error::Storage(error.into()))
    }
}

/// Race the given future against cancellation; `None` means cancelled.
async fn cancellable<F>(token: &CancellationToken, future: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        _ = token.cancelled() => None,
        output = future => Some(output),
    }
}

/// Error possibly returned by [run].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid range: start {start} is greater than stop {stop}")]
    InvalidRange { start: u64, stop: u64 },

    #[error("extraction cancelled")]
    Cancelled,

    #[error("cannot query node")]
    Node(#[source] BoxError),

    #[error("cannot query storage")]
    Storage(#[source] BoxError),

    #[error("cannot process block at height {height}")]
    ProcessBlock {
        height: u64,
        #[source]
        source: BoxError,
    },

    #[error("worker panicked")]
    Join(#[from] tokio::task::JoinError),
}

/// Error of a single per-height pipeline attempt.
#[derive(Debug, Error)]
enum BlockError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("cannot fetch block")]
    FetchBlock(#[source] BoxError),

    #[error("cannot parse block JSON")]
    ParseBlock(#[source] serde_json::Error),

    #[error("cannot decode transaction from block")]
    DecodeTransaction(#[source] base64::DecodeError),

    #[error("cannot fetch transaction {hash}")]
    FetchTransaction {
        hash: String,
        #[source]
        source: BoxError,
    },

    #[error("cannot write block with transactions")]
    Write(#[source] BoxError),
}

/// Error for invalid configuration combinations.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct InvalidConfig(String);
