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

use serde::{Deserialize, Deserializer};
use sqlx::{
    Pool, Postgres,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
};
use std::{fmt, ops::Deref, time::Duration};
use thiserror::Error;

/// Connection pool for Postgres.
#[derive(Debug, Clone)]
pub struct PostgresPool(Pool<Postgres>);

impl PostgresPool {
    /// Create a new [PostgresPool] with the given [Config].
    pub async fn new(config: Config) -> Result<Self, Error> {
        let Config {
            host,
            port,
            dbname,
            user,
            password,
            sslmode,
            max_connections,
            idle_timeout,
            max_lifetime,
        } = config;

        let options = PgConnectOptions::new()
            .host(&host)
            .port(port)
            .database(&dbname)
            .username(&user)
            .password(&password)
            .ssl_mode(sslmode);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(idle_timeout)
            .max_lifetime(max_lifetime)
            .connect_with(options)
            .await?;

        Ok(Self(pool))
    }
}

impl Deref for PostgresPool {
    type Target = Pool<Postgres>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Configuration for [PostgresPool].
#[derive(Clone, Deserialize)]
pub struct Config {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub dbname: String,

    pub user: String,

    pub password: String,

    #[serde(default = "default_sslmode", deserialize_with = "deserialize_sslmode")]
    pub sslmode: PgSslMode,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    #[serde(default = "default_max_lifetime")]
    pub max_lifetime: Duration,
}

// The password must not leak into startup logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("sslmode", &self.sslmode)
            .field("max_connections", &self.max_connections)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

fn default_port() -> u16 {
    5432
}

fn default_sslmode() -> PgSslMode {
    PgSslMode::Prefer
}

fn default_max_connections() -> u32 {
    10
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(5 * 60)
}

fn deserialize_sslmode<'de, D>(deserializer: D) -> Result<PgSslMode, D::Error>
where
    D: Deserializer<'de>,
{
    let sslmode = String::deserialize(deserializer)?;
    sslmode.parse().map_err(serde::de::Error::custom)
}

/// Error possibly returned by [PostgresPool::new].
#[derive(Debug, Error)]
#[error("cannot create Postgres connection pool")]
pub struct Error(#[from] sqlx::Error);

#[cfg(test)]
mod tests {
    use crate::infra::pool::postgres::Config;

    #[test]
    fn test_config_deserialize() {
        let config = serde_json::from_str::<Config>(
            r#"{
                "host": "localhost",
                "dbname": "indexer",
                "user": "indexer",
                "password": "indexer",
                "sslmode": "disable"
            }"#,
        )
        .expect("config can be deserialized");

        assert_eq!(config.port, 5432);
        assert_eq!(config.max_connections, 10);
    }
}
