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

use std::error::Error as StdError;

/// Chain node abstraction.
#[trait_variant::make(Send)]
pub trait Node
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    /// Fetch the block at the given height as canonical JSON, including its
    /// inline transaction list.
    async fn fetch_block(&self, height: u64) -> Result<Vec<u8>, Self::Error>;

    /// Fetch the transaction with the given lowercase hex hash as canonical
    /// JSON.
    async fn fetch_transaction(&self, hash: &str) -> Result<Vec<u8>, Self::Error>;

    /// The latest block height known to the node.
    async fn latest_height(&self) -> Result<u64, Self::Error>;

    /// The bech32 address prefix of the chain.
    async fn bech32_prefix(&self) -> Result<String, Self::Error>;
}
