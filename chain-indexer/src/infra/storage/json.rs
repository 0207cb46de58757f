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
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;

/// [domain::storage::Storage] implementation writing a directory tree of JSON
/// files: `block/block_<height>.json` and `txs/tx_<hash>.json`.
#[derive(Debug, Clone)]
pub struct Storage {
    block_dir: PathBuf,
    tx_dir: PathBuf,
}

impl Storage {
    pub async fn new(out_dir: impl AsRef<Path>) -> Result<Self, io::Error> {
        let block_dir = out_dir.as_ref().join("block");
        let tx_dir = out_dir.as_ref().join("txs");

        fs::create_dir_all(&block_dir).await?;
        fs::create_dir_all(&tx_dir).await?;

        Ok(Self { block_dir, tx_dir })
    }
}

impl domain::storage::Storage for Storage {
    type Error = io::Error;

    async fn write_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> Result<(), io::Error> {
        let path = self
            .block_dir
            .join(format!("block_{:010}.json", block.height));
        fs::write(&path, &block.data).await?;

        for transaction in transactions {
            let path = self.tx_dir.join(format!("tx_{}.json", transaction.hash));
            fs::write(&path, &transaction.data).await?;
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

    async fn close(&self) {}
}
