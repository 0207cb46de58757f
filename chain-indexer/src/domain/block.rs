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

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A chain block identified by its height, with its canonical JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub data: Vec<u8>,
}

/// A chain transaction identified by its content hash, with its canonical JSON
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: String,
    pub data: Vec<u8>,
}

/// The lowercase hex encoding of the SHA-256 digest of the raw transaction
/// bytes; this is the hash under which the node serves the transaction.
pub fn transaction_hash(tx_bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(tx_bytes))
}

/// The base64 encoded transactions under `block.data.txs` of a block response.
/// An absent or empty list means the block carries no transactions.
pub fn block_transactions(block_json: &Value) -> Vec<&str> {
    block_json
        .get("block")
        .and_then(|block| block.get("data"))
        .and_then(|data| data.get("txs"))
        .and_then(Value::as_array)
        .map(|txs| txs.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Decode a single base64 encoded transaction into its raw bytes.
pub fn decode_transaction(tx: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(tx)
}
