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

use fastrace::collector::{Config, ConsoleReporter};

/// Initialize logging via the `RUST_LOG` environment variable, defaulting to
/// the `info` level.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

/// Initialize tracing with a console reporter.
pub fn init_tracing() {
    fastrace::set_reporter(ConsoleReporter, Config::default());
}

/// Flush any pending trace spans; to be called before process exit.
pub fn flush() {
    fastrace::flush();
}
