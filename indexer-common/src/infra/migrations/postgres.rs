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

use crate::infra::pool::postgres::PostgresPool;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Run the database migrations for Postgres; a no-op if already at latest.
pub async fn run(pool: &PostgresPool) -> Result<(), Error> {
    sqlx::migrate!("migrations/postgres").run(&**pool).await?;
    Ok(())
}

/// Error possibly returned by [run].
#[derive(Debug, Error)]
#[error("cannot run migrations for postgres")]
pub struct Error(#[from] MigrateError);
