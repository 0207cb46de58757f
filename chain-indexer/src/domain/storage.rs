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

use crate::domain::{Block, Transaction};
use std::error::Error as StdError;

/// Storage abstraction: the persistent side-effect target of the extraction
/// pipeline.
#[trait_variant::make(Send)]
pub trait Storage
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    /// Write the given block together with all of its transactions. The write
    /// is atomic and idempotent for the same (height, hash) pairs.
    async fn write_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> Result<(), Self::Error>;

    /// The height of the highest stored block, or `None` if the store is
    /// empty.
    async fn get_latest_height(&self) -> Result<Option<u64>, Self::Error>;

    /// The height of the lowest stored block, or `None` if the store is
    /// empty.
    async fn get_earliest_height(&self) -> Result<Option<u64>, Self::Error>;

    /// All heights absent from the closed interval `[min, max]` of stored
    /// heights, ascending; empty if the store is empty or dense.
    async fn get_missing_heights(&self) -> Result<Vec<u64>, Self::Error>;

    /// Release all resources; idempotent.
    async fn close(&self);
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::{
        collections::BTreeMap,
        convert::Infallible,
        sync::{Arc, Mutex},
    };

    /// In-memory [Storage] for tests.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryStorage {
        inner: Arc<Mutex<Inner>>,
    }

    #[derive(Debug, Default)]
    struct Inner {
        blocks: BTreeMap<u64, Vec<u8>>,
        transactions: BTreeMap<String, Vec<u8>>,
    }

    impl MemoryStorage {
        pub fn with_blocks(heights: impl IntoIterator<Item = u64>) -> Self {
            let storage = Self::default();

            {
                let mut inner = storage.inner.lock().expect("lock can be acquired");
                for height in heights {
                    inner.blocks.insert(height, b"{}".to_vec());
                }
            }

            storage
        }

        pub fn block_heights(&self) -> Vec<u64> {
            let inner = self.inner.lock().expect("lock can be acquired");
            inner.blocks.keys().copied().collect()
        }

        pub fn block_data(&self, height: u64) -> Option<Vec<u8>> {
            let inner = self.inner.lock().expect("lock can be acquired");
            inner.blocks.get(&height).cloned()
        }

        pub fn transaction_hashes(&self) -> Vec<String> {
            let inner = self.inner.lock().expect("lock can be acquired");
            inner.transactions.keys().cloned().collect()
        }
    }

    impl Storage for MemoryStorage {
        type Error = Infallible;

        async fn write_block_with_transactions(
            &self,
            block: &Block,
            transactions: &[Transaction],
        ) -> Result<(), Self::Error> {
            let mut inner = self.inner.lock().expect("lock can be acquired");

            inner.blocks.insert(block.height, block.data.clone());
            for transaction in transactions {
                inner
                    .transactions
                    .insert(transaction.hash.clone(), transaction.data.clone());
            }

            Ok(())
        }

        async fn get_latest_height(&self) -> Result<Option<u64>, Self::Error> {
            let inner = self.inner.lock().expect("lock can be acquired");
            Ok(inner.blocks.keys().next_back().copied())
        }

        async fn get_earliest_height(&self) -> Result<Option<u64>, Self::Error> {
            let inner = self.inner.lock().expect("lock can be acquired");
            Ok(inner.blocks.keys().next().copied())
        }

        async fn get_missing_heights(&self) -> Result<Vec<u64>, Self::Error> {
            let inner = self.inner.lock().expect("lock can be acquired");

            let (Some(min), Some(max)) = (
                inner.blocks.keys().next().copied(),
                inner.blocks.keys().next_back().copied(),
            ) else {
                return Ok(vec![]);
            };

            let missing = (min..=max)
                .filter(|height| !inner.blocks.contains_key(height))
                .collect();

            Ok(missing)
        }

        async fn close(&self) {}
    }
}
