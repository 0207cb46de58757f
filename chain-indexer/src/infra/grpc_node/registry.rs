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

use prost_reflect::{DescriptorPool, MethodDescriptor};
use prost_types::{FileDescriptorProto, field_descriptor_proto::Type};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

const ABCI_DESCRIPTOR_PATH: &str = "cosmos/base/abci/v1beta1/abci.proto";
const RAW_LOG_FIELD: &str = "raw_log";

/// Build a descriptor pool from a bag of file descriptor protos: sort them in
/// dependency order, patch known-broken fields, and register them one by one.
pub fn build_descriptor_pool(
    files: Vec<FileDescriptorProto>,
) -> Result<DescriptorPool, RegistryError> {
    let sorted = topological_sort(files)?;

    let mut pool = DescriptorPool::new();
    for mut file in sorted {
        patch_descriptor(&mut file);
        pool.add_file_descriptor_proto(file)?;
    }

    Ok(pool)
}

/// Sort the given file descriptors such that every file comes after all of its
/// dependencies. Dependencies absent from the input are skipped; they are
/// fetched on demand by the resolver.
pub fn topological_sort(
    files: Vec<FileDescriptorProto>,
) -> Result<Vec<FileDescriptorProto>, RegistryError> {
    let mut by_name = files
        .into_iter()
        .map(|file| (file.name().to_owned(), file))
        .collect::<BTreeMap<_, _>>();
    let names = by_name.keys().cloned().collect::<Vec<_>>();

    let mut visited = HashSet::new();
    let mut in_progress = HashSet::new();
    let mut sorted = Vec::with_capacity(by_name.len());

    fn visit(
        name: &str,
        by_name: &mut BTreeMap<String, FileDescriptorProto>,
        visited: &mut HashSet<String>,
        in_progress: &mut HashSet<String>,
        sorted: &mut Vec<FileDescriptorProto>,
    ) -> Result<(), RegistryError> {
        if in_progress.contains(name) {
            return Err(RegistryError::CircularDependency(name.to_owned()));
        }
        if visited.contains(name) {
            return Ok(());
        }

        in_progress.insert(name.to_owned());

        let dependencies = by_name
            .get(name)
            .map(|file| file.dependency.clone())
            .unwrap_or_default();
        for dep in &dependencies {
            if by_name.contains_key(dep) {
                visit(dep, by_name, visited, in_progress, sorted)?;
            }
        }

        in_progress.remove(name);
        visited.insert(name.to_owned());
        if let Some(file) = by_name.remove(name) {
            sorted.push(file);
        }

        Ok(())
    }

    for name in &names {
        if !visited.contains(name.as_str()) {
            visit(
                name,
                &mut by_name,
                &mut visited,
                &mut in_progress,
                &mut sorted,
            )?;
        }
    }

    Ok(sorted)
}

/// Apply targeted patches for known node-side descriptor bugs.
///
/// The `raw_log` field of `TxResponse` in `cosmos/base/abci/v1beta1/abci.proto`
/// is declared as `string` but some chains emit invalid UTF-8 in it, which
/// breaks JSON marshalling. Retyping the field to `bytes` makes it serialize
/// as a base64 encoded string instead.
/// See https://github.com/cosmos/cosmos-sdk/issues/22414
pub fn patch_descriptor(file: &mut FileDescriptorProto) {
    if file.name() != ABCI_DESCRIPTOR_PATH {
        return;
    }

    for message in &mut file.message_type {
        for field in &mut message.field {
            if field.name() == RAW_LOG_FIELD && field.r#type() == Type::String {
                field.set_type(Type::Bytes);
            }
        }
    }
}

/// Find a method by its fully-qualified service name and its method name.
pub fn find_method(
    pool: &DescriptorPool,
    service_name: &str,
    method_name: &str,
) -> Option<MethodDescriptor> {
    pool.services()
        .find(|service| service.full_name() == service_name)
        .and_then(|service| service.methods().find(|method| method.name() == method_name))
}

/// Error possibly returned by [build_descriptor_pool].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A dependency cycle among the descriptor files.
    #[error("circular dependency detected at {0}")]
    CircularDependency(String),

    #[error("cannot register file descriptor")]
    Register(#[from] prost_reflect::DescriptorError),
}
