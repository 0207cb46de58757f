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

use anyhow::Context;
use chain_indexer::{
    application,
    config::{Config, StorageConfig},
    domain::storage::Storage,
    infra::{grpc_node::GrpcNode, storage},
};
use indexer_common::{
    config::ConfigExt,
    infra::{migrations, pool},
    telemetry,
};
use log::{error, info, warn};
use std::panic;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    telemetry::init_logging();
    panic::set_hook(Box::new(|panic| error!(panic:%; "process panicked")));

    if let Err(error) = run().await {
        let error = format!("{error:#}");
        error!(error; "process exited with ERROR");
        telemetry::flush();
        std::process::exit(1);
    }

    telemetry::flush();
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("load configuration")?;
    info!(config:?; "starting");
    config.validate().context("validate configuration")?;

    telemetry::init_tracing();

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone()).context("install signal handlers")?;

    let node = GrpcNode::new(config.infra.node, token.clone())
        .await
        .context("create gRPC node client")?;

    let application_config = config.application;
    let result = match config.infra.storage {
        StorageConfig::Postgres(storage_config) => {
            // The sink pool is sized to the worker pool.
            let storage_config = pool::postgres::Config {
                max_connections: application_config.max_concurrency as u32,
                ..storage_config
            };
            let pool = pool::postgres::PostgresPool::new(storage_config)
                .await
                .context("create DB pool for Postgres")?;
            migrations::postgres::run(&pool)
                .await
                .context("run migrations for Postgres")?;

            run_with_storage(
                application_config,
                node,
                storage::postgres::Storage::new(pool),
                token,
            )
            .await
        }

        StorageConfig::Json { dir } => {
            let storage = storage::json::Storage::new(&dir)
                .await
                .context("create JSON output directory")?;
            run_with_storage(application_config, node, storage, token).await
        }

        StorageConfig::Tsv { dir } => {
            let storage = storage::tsv::Storage::new(&dir)
                .await
                .context("create TSV output files")?;
            run_with_storage(application_config, node, storage, token).await
        }
    };

    match result {
        Err(application::Error::Cancelled) => {
            warn!("extraction cancelled, shutting down");
            Ok(())
        }

        result => result.context("run extraction"),
    }
}

async fn run_with_storage<S>(
    config: application::Config,
    node: GrpcNode,
    storage: S,
    token: CancellationToken,
) -> Result<(), application::Error>
where
    S: Storage,
{
    let result = application::run(config, node, storage.clone(), token).await;
    storage.close().await;
    result
}

fn spawn_signal_handler(token: CancellationToken) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }

        warn!("received shutdown signal");
        token.cancel();
    });

    Ok(())
}
