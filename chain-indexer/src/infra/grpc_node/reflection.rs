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

use indexer_common::retry;
use log::debug;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic_reflection::pb::v1alpha::{
    ServerReflectionRequest, server_reflection_client::ServerReflectionClient,
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse,
};

/// Client for the server reflection endpoint of the node.
#[derive(Debug, Clone)]
pub struct ReflectionClient {
    client: ServerReflectionClient<Channel>,
}

impl ReflectionClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: ServerReflectionClient::new(channel),
        }
    }

    /// List the fully-qualified names of all services exposed by the node.
    pub async fn list_services(&self) -> Result<Vec<String>, ReflectionError> {
        let response = self
            .send_request(MessageRequest::ListServices("*".to_string()))
            .await?;

        match response {
            MessageResponse::ListServicesResponse(services) => Ok(services
                .service
                .into_iter()
                .map(|service| service.name)
                .collect()),

            _ => Err(ReflectionError::UnexpectedResponse),
        }
    }

    /// The file descriptors of the files which contain the given symbol.
    pub async fn file_containing_symbol(
        &self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        self.send_file_request(MessageRequest::FileContainingSymbol(symbol.to_string()))
            .await
    }

    /// The file descriptors of the file with the given name.
    pub async fn file_by_filename(
        &self,
        name: &str,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        self.send_file_request(MessageRequest::FileByFilename(name.to_string()))
            .await
    }

    async fn send_file_request(
        &self,
        message_request: MessageRequest,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        let response = self.send_request(message_request).await?;

        match response {
            MessageResponse::FileDescriptorResponse(files) => files
                .file_descriptor_proto
                .into_iter()
                .map(|bytes| FileDescriptorProto::decode(bytes.as_slice()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(Into::into),

            _ => Err(ReflectionError::UnexpectedResponse),
        }
    }

    /// Open a reflection stream, send a single request, read a single response
    /// and release the stream.
    async fn send_request(
        &self,
        message_request: MessageRequest,
    ) -> Result<MessageResponse, ReflectionError> {
        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(message_request),
        };

        let mut client = self.client.clone();
        let mut responses = client
            .server_reflection_info(tokio_stream::once(request))
            .await?
            .into_inner();

        let response = responses
            .message()
            .await?
            .ok_or(ReflectionError::EndOfStream)?;

        match response.message_response {
            Some(MessageResponse::ErrorResponse(error)) => Err(ReflectionError::ErrorResponse {
                code: error.error_code,
                message: error.error_message,
            }),

            Some(message_response) => Ok(message_response),

            None => Err(ReflectionError::EndOfStream),
        }
    }
}

/// Fetch the file descriptors for all services exposed by the node, including
/// their transitive dependencies, deduplicated by file path.
pub async fn fetch_all_descriptors(
    client: &ReflectionClient,
    max_retries: u32,
    token: &CancellationToken,
) -> Result<Vec<FileDescriptorProto>, retry::Error<ReflectionError>> {
    let services =
        retry::with_backoff("list services", max_retries, token, || {
            client.list_services()
        })
        .await?;
    debug!(services = services.len(); "services listed");

    let mut seen = BTreeMap::new();

    for service in services {
        let files = retry::with_backoff("file containing symbol", max_retries, token, || {
            client.file_containing_symbol(&service)
        })
        .await?;

        let mut queue = VecDeque::from(files);
        while let Some(file) = queue.pop_front() {
            let name = file.name().to_owned();
            if seen.contains_key(&name) {
                continue;
            }

            for dep in &file.dependency {
                if !seen.contains_key(dep) {
                    let files =
                        retry::with_backoff("file by filename", max_retries, token, || {
                            client.file_by_filename(dep)
                        })
                        .await?;
                    queue.extend(files);
                }
            }

            seen.insert(name, file);
        }
    }

    Ok(seen.into_values().collect())
}

/// Error possibly returned by reflection calls.
#[derive(Debug, Error)]
pub enum ReflectionError {
    /// Transport-level failure of the reflection call.
    #[error("reflection call failed")]
    Transport(#[from] tonic::Status),

    /// The server returned the error response variant.
    #[error("reflection error: {message} (code: {code})")]
    ErrorResponse { code: i32, message: String },

    #[error("reflection stream closed before a response was received")]
    EndOfStream,

    #[error("unexpected reflection response variant")]
    UnexpectedResponse,

    #[error("cannot decode file descriptor")]
    Decode(#[from] prost::DecodeError),
}
