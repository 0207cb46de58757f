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

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use std::env;

const CONFIG_FILE_ENV: &str = "CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "config";

/// Extension methods for "config structs" which can be deserialized.
pub trait ConfigExt
where
    Self: DeserializeOwned,
{
    /// Load configuration from an optional config file overlaid with environment
    /// variables prefixed with `APP` and separated by `__`, e.g.
    /// `APP__INFRA__STORAGE__PASSWORD`.
    fn load() -> Result<Self, ConfigError> {
        let config_file = env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());

        let config = Config::builder()
            .add_source(File::new(&config_file, FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl<T> ConfigExt for T where T: DeserializeOwned {}
