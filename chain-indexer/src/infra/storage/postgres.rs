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
use fastrace::trace;
use indexer_common::infra::pool::postgres::PostgresPool;
use indoc::indoc;
use serde_json::value::RawValue;
use sqlx::types::Json;

/// [domain::storage::Storage] implementation for Postgres.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: PostgresPool,
}

impl Storage {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

impl domain::storage::Storage for Storage {
    type Error = sqlx::Error;

    #[trace]
    async fn write_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let query = indoc! {"
            INSERT INTO blocks_raw (id, data)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
        "};

        sqlx::query(query)
            .bind(block.height as i64)
            .bind(Json(raw_json(&block.data)?))
            .execute(&mut *tx)
            .await?;

        let query = indoc! {"
            INSERT INTO transactions_raw (id, data)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
        "};

        for transaction in transactions {
            sqlx::query(query)
                .bind(&transaction.hash)
                .bind(Json(raw_json(&transaction.data)?))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    #[trace]
    async fn get_latest_height(&self) -> Result<Option<u64>, sqlx::Error> {
        let query = indoc! {"
            SELECT id
            FROM blocks_raw
            ORDER BY id DESC
            LIMIT 1
        "};

        let height = sqlx::query_as::<_, (i64,)>(query)
            .fetch_optional(&*self.pool)
            .await?
            .map(|(id,)| id as u64);

        Ok(height)
    }

    #[trace]
    async fn get_earliest_height(&self) -> Result<Option<u64>, sqlx::Error> {
        let query = indoc! {"
            SELECT id
            FROM blocks_raw
            ORDER BY id ASC
            LIMIT 1
        "};

        let height = sqlx::query_as::<_, (i64,)>(query)
            .fetch_optional(&*self.pool)
            .await?
            .map(|(id,)| id as u64);

        Ok(height)
    }

    #[trace]
    async fn get_missing_heights(&self) -> Result<Vec<u64>, sqlx::Error> {
        let query = indoc! {"
            SELECT s.id
            FROM generate_series(
                (SELECT MIN(id) FROM blocks_raw),
                (SELECT MAX(id) FROM blocks_raw)
            ) AS s(id)
            LEFT JOIN blocks_raw b ON b.id = s.id
            WHERE b.id IS NULL
            ORDER BY s.id
        "};

        let heights = sqlx::query_as::<_, (i64,)>(query)
            .fetch_all(&*self.pool)
            .await?
            .into_iter()
            .map(|(id,)| id as u64)
            .collect();

        Ok(heights)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn raw_json(data: &[u8]) -> Result<&RawValue, sqlx::Error> {
    serde_json::from_slice::<&RawValue>(data).map_err(|error| sqlx::Error::Decode(error.into()))
}

#[cfg(test)]
mod tests {
    use crate::{
        domain::{Block, Transaction, storage::Storage as _},
        infra::storage::postgres::Storage,
    };
    use anyhow::Context;
    use indexer_common::infra::{
        migrations,
        pool::{self, postgres::PostgresPool},
    };
    use sqlx::postgres::PgSslMode;
    use std::{error::Error as StdError, time::Duration};
    use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
    use testcontainers_modules::postgres::Postgres;

    async fn storage()
    -> Result<(Storage, PostgresPool, ContainerAsync<Postgres>), Box<dyn StdError>> {
        let postgres_container = Postgres::default()
            .with_db_name("indexer")
            .with_user("indexer")
            .with_password("indexer")
            .with_tag("17.1-alpine")
            .start()
            .await
            .context("start Postgres container")?;
        let postgres_port = postgres_container
            .get_host_port_ipv4(5432)
            .await
            .context("get Postgres port")?;

        let config = pool::postgres::Config {
            host: "localhost".to_string(),
            port: postgres_port,
            dbname: "indexer".to_string(),
            user: "indexer".to_string(),
            password: "indexer".to_string(),
            sslmode: PgSslMode::Prefer,
            max_connections: 10,
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(5 * 60),
        };
        let pool = PostgresPool::new(config).await?;
        migrations::postgres::run(&pool).await?;

        Ok((Storage::new(pool.clone()), pool, postgres_container))
    }

    fn block(height: u64, data: &str) -> Block {
        Block {
            height,
            data: data.as_bytes().to_vec(),
        }
    }

    fn transaction(hash: &str, data: &str) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            data: data.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_write_and_query_heights() -> Result<(), Box<dyn StdError>> {
        let (storage, _pool, _container) = storage().await?;

        assert_eq!(storage.get_latest_height().await?, None);
        assert_eq!(storage.get_earliest_height().await?, None);
        assert!(storage.get_missing_heights().await?.is_empty());

        for height in [1, 2, 4, 7] {
            storage
                .write_block_with_transactions(&block(height, r#"{"height": "x"}"#), &[])
                .await?;
        }

        assert_eq!(storage.get_latest_height().await?, Some(7));
        assert_eq!(storage.get_earliest_height().await?, Some(1));
        assert_eq!(storage.get_missing_heights().await?, vec![3, 5, 6]);

        Ok(())
    }

    #[tokio::test]
    async fn test_write_idempotent() -> Result<(), Box<dyn StdError>> {
        let (storage, pool, _container) = storage().await?;

        let transactions = vec![transaction("abc123", r#"{"tx": 1}"#)];
        storage
            .write_block_with_transactions(&block(1, r#"{"v": 1}"#), &transactions)
            .await?;

        // Retrying the same height must upsert, not duplicate, and the last
        // write must win.
        let transactions = vec![transaction("abc123", r#"{"tx": 2}"#)];
        storage
            .write_block_with_transactions(&block(1, r#"{"v": 2}"#), &transactions)
            .await?;

        let (block_count,): (i64,) = sqlx::query_as("SELECT count(*) FROM blocks_raw")
            .fetch_one(&*pool)
            .await?;
        let (tx_count,): (i64,) = sqlx::query_as("SELECT count(*) FROM transactions_raw")
            .fetch_one(&*pool)
            .await?;
        assert_eq!(block_count, 1);
        assert_eq!(tx_count, 1);

        let (data,): (serde_json::Value,) =
            sqlx::query_as("SELECT data FROM blocks_raw WHERE id = 1")
                .fetch_one(&*pool)
                .await?;
        assert_eq!(data, serde_json::json!({"v": 2}));

        Ok(())
    }

    #[tokio::test]
    async fn test_write_atomic() -> Result<(), Box<dyn StdError>> {
        let (storage, pool, _container) = storage().await?;

        // The second transaction carries invalid JSON, so the whole write must
        // roll back.
        let transactions = vec![
            transaction("aaa", r#"{"tx": 1}"#),
            transaction("bbb", "not json"),
        ];
        let result = storage
            .write_block_with_transactions(&block(1, r#"{"v": 1}"#), &transactions)
            .await;
        assert!(result.is_err());

        assert_eq!(storage.get_latest_height().await?, None);
        let (tx_count,): (i64,) = sqlx::query_as("SELECT count(*) FROM transactions_raw")
            .fetch_one(&*pool)
            .await?;
        assert_eq!(tx_count, 0);

        Ok(())
    }
}
