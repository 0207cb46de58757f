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

use crate::domain::{self, Block, Transaction};
use log::error;
use std::{io, path::Path, sync::Arc};
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
    sync::Mutex,
};

const BLOCKS_TSV: &str = "blocks.tsv";
const TXS_TSV: &str = "transactions.tsv";

/// [domain::storage::Storage] implementation appending tab separated records
/// to `blocks.tsv` and `transactions.tsv`.
#[derive(Debug, Clone)]
pub struct Storage {
    writers: Arc<Mutex<Writers>>,
}

#[derive(Debug)]
struct Writers {
    blocks: BufWriter<File>,
    transactions: BufWriter<File>,
}

impl Storage {
    pub async fn new(out_dir: impl AsRef<Path>) -> Result<Self, io::Error> {
        fs::create_dir_all(out_dir.as_ref()).await?;

        let blocks = File::create(out_dir.as_ref().join(BLOCKS_TSV)).await?;
        let transactions = File::create(out_dir.as_ref().join(TXS_TSV)).await?;

        Ok(Self {
            writers: Arc::new(Mutex::new(Writers {
                blocks: BufWriter::new(blocks),
                transactions: BufWriter::new(transactions),
            })),
        })
    }
}

impl domain::storage::Storage for Storage {
    type Error = io::Error;

    async fn write_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> Result<(), io::Error> {
        let mut writers = self.writers.lock().await;

        writers
            .blocks
            .write_all(format!("{}\t", block.height).as_bytes())
            .await?;
        writers.blocks.write_all(&block.data).await?;
        writers.blocks.write_all(b"\n").await?;

        for transaction in transactions {
            writers
                .transactions
                .write_all(format!("{}\t", transaction.hash).as_bytes())
                .await?;
            writers.transactions.write_all(&transaction.data).await?;
            writers.transactions.write_all(b"\n").await?;
        }

        Ok(())
    }

    // File sinks do not track heights; extraction over them always starts
    // from block 1 unless an explicit range is given.
    async fn get_latest_height(&self) -> Result<Option<u64>, io::Error> {
        Ok(None)
    }

    async fn get_earliest_height(&self) -> Result<Option<u64>, io::Error> {
        Ok(None)
    }

    async fn get_missing_heights(&self) -> Result<Vec<u64>, io::Error> {
        Ok(vec![])
    }

    async fn close(&self) {
        let mut writers = self.writers.lock().await;

        if let Err(e) = writers.blocks.flush().await {
            error!(error:% = e; "cannot flush blocks TSV writer");
        }
        if let Err(e) = writers.transactions.flush().await {
            error!(error:% = e; "cannot flush transactions TSV writer");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        domain::{Block, Transaction, storage::Storage as _},
        infra::storage::tsv::Storage,
    };
    use std::error::Error as StdError;

    #[tokio::test]
    async fn test_write() -> Result<(), Box<dyn StdError>> {
        let out_dir = tempfile::tempdir()?;
        let storage = Storage::new(out_dir.path()).await?;

        let block = Block {
            height: 1,
            data: br#"{"v": 1}"#.to_vec(),
        };
        let transactions = vec![Transaction {
            hash: "abc123".to_string(),
            data: br#"{"tx": 1}"#.to_vec(),
        }];
        storage
            .write_block_with_transactions(&block, &transactions)
            .await?;
        storage.close().await;

        let blocks = tokio::fs::read_to_string(out_dir.path().join("blocks.tsv")).await?;
        assert_eq!(blocks, "1\t{\"v\": 1}\n");

        let txs = tokio::fs::read_to_string(out_dir.path().join("transactions.tsv")).await?;
        assert_eq!(txs, "abc123\t{\"tx\": 1}\n");

        Ok(())
    }
}
