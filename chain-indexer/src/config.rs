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

use crate::{
    application::{self, InvalidConfig},
    infra::grpc_node,
};
use indexer_common::infra::pool;
use serde::Deserialize;
use std::path::PathBuf;

/// The complete configuration of the indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub application: application::Config,
    pub infra: InfraConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        self.application.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfraConfig {
    pub node: grpc_node::Config,
    pub storage: StorageConfig,
}

/// Sink selection, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Transactional store; the primary sink.
    Postgres(pool::postgres::Config),

    /// Directory tree of JSON files.
    Json { dir: PathBuf },

    /// Tab separated files.
    Tsv { dir: PathBuf },
}
