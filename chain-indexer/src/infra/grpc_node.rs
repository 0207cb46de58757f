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

pub mod invoker;
pub mod reflection;
pub mod registry;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

use crate::{
    domain::node::Node,
    infra::grpc_node::{
        invoker::{InvokeError, Invoker},
        reflection::{ReflectionClient, ReflectionError},
        registry::RegistryError,
        resolver::DynamicResolver,
    },
};
use indexer_common::retry;
use log::info;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tonic::transport::{ClientTlsConfig, Endpoint};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// A [Node] implementation against a Cosmos SDK gRPC endpoint, decoding via
/// protocol descriptors discovered through server reflection.
#[derive(Clone)]
pub struct GrpcNode {
    invoker: Invoker,
    methods: Methods,
    max_retries: u32,
    token: CancellationToken,
}

impl GrpcNode {
    /// Create a new [GrpcNode] with the given [Config]: connect to the node,
    /// fetch all protocol descriptors via reflection and build the dynamic
    /// resolver and invoker on top of them.
    pub async fn new(config: Config, token: CancellationToken) -> Result<Self, Error> {
        let Config {
            url,
            insecure,
            max_recv_msg_size,
            max_retries,
            methods,
        } = config;

        let mut endpoint = Endpoint::from_shared(url.clone())
            .map_err(|error| Error::InvalidUrl(url, error))?
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true);
        if !insecure {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(Error::Connect)?;
        }
        let channel = endpoint.connect().await.map_err(Error::Connect)?;

        info!("fetching protocol descriptors from node, this may take a while");
        let reflection = ReflectionClient::new(channel.clone());
        let descriptors = reflection::fetch_all_descriptors(&reflection, max_retries, &token).await?;

        info!(files = descriptors.len(); "building descriptor pool");
        let pool = registry::build_descriptor_pool(descriptors)?;

        let resolver = DynamicResolver::new(pool, reflection, max_retries, token.clone());
        let invoker = Invoker::new(channel, resolver, max_recv_msg_size);

        Ok(Self {
            invoker,
            methods,
            max_retries,
            token,
        })
    }
}

impl Node for GrpcNode {
    type Error = GrpcNodeError;

    async fn fetch_block(&self, height: u64) -> Result<Vec<u8>, Self::Error> {
        let input = format!(r#"{{"height": {height}}}"#);
        let json = self
            .invoker
            .invoke_json(&self.methods.block, Some(&input))
            .await?;

        Ok(json)
    }

    async fn fetch_transaction(&self, hash: &str) -> Result<Vec<u8>, Self::Error> {
        let input = format!(r#"{{"hash": "{hash}"}}"#);
        let json = self
            .invoker
            .invoke_json(&self.methods.tx, Some(&input))
            .await?;

        Ok(json)
    }

    async fn latest_height(&self) -> Result<u64, Self::Error> {
        let height = retry::with_backoff("latest height", self.max_retries, &self.token, || {
            self.invoker
                .invoke_string_field(&self.methods.status, "height")
        })
        .await?;

        height
            .parse()
            .map_err(|_| GrpcNodeError::ParseHeight(height))
    }

    async fn bech32_prefix(&self) -> Result<String, Self::Error> {
        let prefix = retry::with_backoff("bech32 prefix", self.max_retries, &self.token, || {
            self.invoker
                .invoke_string_field(&self.methods.bech32_prefix, "bech32_prefix")
        })
        .await?;

        Ok(prefix)
    }
}

/// Configuration for [GrpcNode].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The gRPC endpoint of the node, e.g. `https://grpc.example.com:443`.
    pub url: String,

    /// Connect without TLS.
    #[serde(default)]
    pub insecure: bool,

    /// Maximum inbound gRPC message size in bytes; some chain responses exceed
    /// the 4 MiB default.
    #[serde(default = "default_max_recv_msg_size")]
    pub max_recv_msg_size: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub methods: Methods,
}

/// The fully-qualified method names of the chain services consumed by the
/// indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct Methods {
    #[serde(default = "default_block_method")]
    pub block: String,

    #[serde(default = "default_tx_method")]
    pub tx: String,

    #[serde(default = "default_status_method")]
    pub status: String,

    #[serde(default = "default_bech32_prefix_method")]
    pub bech32_prefix: String,
}

impl Default for Methods {
    fn default() -> Self {
        Self {
            block: default_block_method(),
            tx: default_tx_method(),
            status: default_status_method(),
            bech32_prefix: default_bech32_prefix_method(),
        }
    }
}

fn default_max_recv_msg_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_block_method() -> String {
    "cosmos.tx.v1beta1.Service.GetBlockWithTxs".to_string()
}

fn default_tx_method() -> String {
    "cosmos.tx.v1beta1.Service.GetTx".to_string()
}

fn default_status_method() -> String {
    "cosmos.base.node.v1beta1.Service.Status".to_string()
}

fn default_bech32_prefix_method() -> String {
    "cosmos.auth.v1beta1.Query.Bech32Prefix".to_string()
}

/// Error possibly returned by [GrpcNode::new].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid node URL {0}")]
    InvalidUrl(String, #[source] tonic::transport::Error),

    #[error("cannot connect to node")]
    Connect(#[source] tonic::transport::Error),

    #[error("cannot fetch descriptors from node")]
    FetchDescriptors(#[from] retry::Error<ReflectionError>),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Error possibly returned by [GrpcNode] queries.
#[derive(Debug, Error)]
pub enum GrpcNodeError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Retry(#[from] retry::Error<InvokeError>),

    #[error("cannot parse block height {0}")]
    ParseHeight(String),
}

#[cfg(test)]
mod tests {
    use crate::infra::grpc_node::{Config, Methods};

    #[test]
    fn test_config_deserialize() {
        let config = serde_json::from_str::<Config>(
            r#"{
                "url": "http://localhost:9090",
                "insecure": true
            }"#,
        )
        .expect("config can be deserialized");

        assert!(config.insecure);
        assert_eq!(config.max_recv_msg_size, 4 * 1024 * 1024);
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.methods.block,
            "cosmos.tx.v1beta1.Service.GetBlockWithTxs"
        );

        let methods = Methods::default();
        assert_eq!(methods.status, "cosmos.base.node.v1beta1.Service.Status");
        assert_eq!(
            methods.bech32_prefix,
            "cosmos.auth.v1beta1.Query.Bech32Prefix"
        );
    }
}
