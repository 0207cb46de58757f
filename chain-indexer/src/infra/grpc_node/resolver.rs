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

use crate::infra::grpc_node::{
    reflection::{ReflectionClient, ReflectionError},
    registry,
};
use indexer_common::retry;
use log::debug;
use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor};
use prost_types::FileDescriptorProto;
use std::{collections::HashSet, future::Future, pin::Pin, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Name based lookups over the descriptor registry with lazy, on-demand
/// fetching of missing descriptors via server reflection.
///
/// A single read-write lock guards the descriptor pool and the set of symbols
/// already requested. The lock is never held across a reflection call: missing
/// dependencies are captured under the lock, fetched with the lock released,
/// and registered after reacquiring it.
#[derive(Clone)]
pub struct DynamicResolver {
    inner: Arc<RwLock<Inner>>,
    reflection: ReflectionClient,
    max_retries: u32,
    token: CancellationToken,
}

struct Inner {
    pool: DescriptorPool,
    seen_symbols: HashSet<String>,
}

impl DynamicResolver {
    pub fn new(
        pool: DescriptorPool,
        reflection: ReflectionClient,
        max_retries: u32,
        token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                pool,
                seen_symbols: HashSet::new(),
            })),
            reflection,
            max_retries,
            token,
        }
    }

    /// A snapshot of the descriptor pool.
    pub async fn pool(&self) -> DescriptorPool {
        self.inner.read().await.pool.clone()
    }

    /// Find a method by its fully-qualified service name and its method name.
    pub async fn find_method(
        &self,
        service_name: &str,
        method_name: &str,
    ) -> Result<MethodDescriptor, ResolverError> {
        let inner = self.inner.read().await;
        registry::find_method(&inner.pool, service_name, method_name).ok_or_else(|| {
            ResolverError::MethodNotFound {
                service: service_name.to_owned(),
                method: method_name.to_owned(),
            }
        })
    }

    /// Find a message by its fully-qualified name, fetching the containing
    /// file via reflection if absent.
    pub async fn find_message_by_name(
        &self,
        name: &str,
    ) -> Result<MessageDescriptor, ResolverError> {
        {
            let inner = self.inner.read().await;
            if let Some(message) = inner.pool.get_message_by_name(name) {
                return Ok(message);
            }
        }

        self.fetch_symbol(name).await?;

        let inner = self.inner.read().await;
        inner
            .pool
            .get_message_by_name(name)
            .ok_or_else(|| ResolverError::SymbolNotFound(name.to_owned()))
    }

    /// Find a message by its type URL, i.e. its fully-qualified name with a
    /// leading `/`.
    pub async fn find_message_by_url(&self, url: &str) -> Result<MessageDescriptor, ResolverError> {
        self.find_message_by_name(url.strip_prefix('/').unwrap_or(url))
            .await
    }

    async fn fetch_symbol(&self, symbol: &str) -> Result<(), ResolverError> {
        {
            let mut inner = self.inner.write().await;
            if !inner.seen_symbols.insert(symbol.to_owned()) {
                // The symbol was requested before and is still unknown; do not
                // fetch again.
                return Err(ResolverError::SymbolNotFound(symbol.to_owned()));
            }
        }

        debug!(symbol; "fetching descriptor via reflection");

        let files = retry::with_backoff(
            "file containing symbol",
            self.max_retries,
            &self.token,
            || self.reflection.file_containing_symbol(symbol),
        )
        .await?;

        for file in files {
            self.register_file(file).await?;
        }

        Ok(())
    }

    /// Register the given file after fetching and registering all of its
    /// unresolved dependencies by filename. A fetched dependency may reveal
    /// further missing dependencies, hence the recursion.
    fn register_file(
        &self,
        file: FileDescriptorProto,
    ) -> Pin<Box<dyn Future<Output = Result<(), ResolverError>> + Send + '_>> {
        Box::pin(async move {
            let name = file.name().to_owned();

            let missing = {
                let inner = self.inner.read().await;
                if inner.pool.get_file_by_name(&name).is_some() {
                    return Ok(());
                }

                file.dependency
                    .iter()
                    .filter(|dep| inner.pool.get_file_by_name(dep).is_none())
                    .cloned()
                    .collect::<Vec<_>>()
            };

            for dep in missing {
                let files = retry::with_backoff(
                    "file by filename",
                    self.max_retries,
                    &self.token,
                    || self.reflection.file_by_filename(&dep),
                )
                .await?;

                for file in files {
                    self.register_file(file).await?;
                }
            }

            let mut inner = self.inner.write().await;
            if inner.pool.get_file_by_name(&name).is_some() {
                return Ok(());
            }

            let mut file = file;
            registry::patch_descriptor(&mut file);
            inner.pool.add_file_descriptor_proto(file)?;

            Ok(())
        })
    }
}

/// Error possibly returned by [DynamicResolver] lookups.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("method {method} not found in service {service}")]
    MethodNotFound { service: String, method: String },

    #[error("message {0} not found")]
    SymbolNotFound(String),

    #[error(transparent)]
    Fetch(#[from] retry::Error<ReflectionError>),

    #[error("cannot register file descriptor")]
    Register(#[from] prost_reflect::DescriptorError),
}

#[cfg(test)]
mod tests {
    use crate::infra::grpc_node::{
        reflection::ReflectionClient,
        registry::build_descriptor_pool,
        resolver::{DynamicResolver, ResolverError},
        testing,
    };
    use std::error::Error as StdError;
    use tokio_util::sync::CancellationToken;

    async fn resolver() -> Result<DynamicResolver, Box<dyn StdError>> {
        let channel = testing::spawn_reflection_server().await?;
        let reflection = ReflectionClient::new(channel);

        // Only part of the schema is registered up front; the rest is fetched
        // lazily.
        let pool = build_descriptor_pool(vec![
            testing::any_descriptor(),
            testing::block_descriptor(),
        ])?;

        Ok(DynamicResolver::new(
            pool,
            reflection,
            1,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_find_method() -> Result<(), Box<dyn StdError>> {
        let channel = testing::spawn_reflection_server().await?;
        let reflection = ReflectionClient::new(channel);
        let pool = build_descriptor_pool(testing::test_descriptors())?;
        let resolver = DynamicResolver::new(pool, reflection, 1, CancellationToken::new());

        let method = resolver
            .find_method("test.v1.BlockService", "GetBlock")
            .await?;
        assert_eq!(method.name(), "GetBlock");

        let result = resolver
            .find_method("test.v1.BlockService", "DoesNotExist")
            .await;
        assert!(matches!(result, Err(ResolverError::MethodNotFound { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_find_message_registered() -> Result<(), Box<dyn StdError>> {
        let resolver = resolver().await?;

        let message = resolver.find_message_by_name("test.v1.Block").await?;
        assert_eq!(message.full_name(), "test.v1.Block");

        Ok(())
    }

    #[tokio::test]
    async fn test_find_message_lazy_fetch() -> Result<(), Box<dyn StdError>> {
        let resolver = resolver().await?;

        // test.v1.Extra lives in test/v1/extra.proto which is not registered
        // up front and must be fetched via reflection.
        assert!(
            resolver
                .pool()
                .await
                .get_message_by_name("test.v1.Extra")
                .is_none()
        );

        let message = resolver.find_message_by_name("test.v1.Extra").await?;
        assert_eq!(message.full_name(), "test.v1.Extra");

        // The containing file and its dependencies are now registered.
        assert!(
            resolver
                .pool()
                .await
                .get_file_by_name("test/v1/extra.proto")
                .is_some()
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_find_message_by_url() -> Result<(), Box<dyn StdError>> {
        let resolver = resolver().await?;

        let message = resolver.find_message_by_url("/test.v1.Extra").await?;
        assert_eq!(message.full_name(), "test.v1.Extra");

        Ok(())
    }

    #[tokio::test]
    async fn test_find_message_unknown_symbol_not_refetched()
    -> Result<(), Box<dyn StdError>> {
        let resolver = resolver().await?;

        let result = resolver.find_message_by_name("test.v1.Missing").await;
        assert!(result.is_err());

        // The second lookup must fail fast without another fetch attempt.
        let result = resolver.find_message_by_name("test.v1.Missing").await;
        assert!(matches!(result, Err(ResolverError::SymbolNotFound(_))));

        Ok(())
    }
}
