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

use crate::infra::grpc_node::resolver::{DynamicResolver, ResolverError};
use http::uri::PathAndQuery;
use indexer_common::error::BoxError;
use prost::Message;
use prost_reflect::{
    DynamicMessage, MessageDescriptor, MethodDescriptor, ReflectMessage, SerializeOptions, Value,
};
use std::collections::VecDeque;
use thiserror::Error;
use tonic::{
    Request, Status,
    client::Grpc,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
    transport::Channel,
};

const ANY_TYPE: &str = "google.protobuf.Any";
const ANY_TYPE_URL_FIELD: &str = "type_url";
const ANY_VALUE_FIELD: &str = "value";

/// Issues single unary gRPC calls described only by their method descriptors,
/// with JSON shaped input and canonical JSON output.
#[derive(Clone)]
pub struct Invoker {
    channel: Channel,
    resolver: DynamicResolver,
    max_recv_msg_size: usize,
}

impl Invoker {
    pub fn new(channel: Channel, resolver: DynamicResolver, max_recv_msg_size: usize) -> Self {
        Self {
            channel,
            resolver,
            max_recv_msg_size,
        }
    }

    /// Invoke the given fully-qualified method with the given JSON input and
    /// return the canonical JSON encoding of the response.
    pub async fn invoke_json(
        &self,
        method_full_name: &str,
        input_json: Option<&str>,
    ) -> Result<Vec<u8>, InvokeError> {
        let response = self.invoke(method_full_name, input_json).await?;
        self.marshal_canonical_json(response).await
    }

    /// Invoke the given fully-qualified method with an empty input message and
    /// return the named top-level scalar field of the response as a string.
    pub async fn invoke_string_field(
        &self,
        method_full_name: &str,
        field_name: &str,
    ) -> Result<String, InvokeError> {
        let response = self.invoke(method_full_name, None).await?;

        let field = response
            .descriptor()
            .get_field_by_name(field_name)
            .ok_or_else(|| InvokeError::MissingField(field_name.to_owned()))?;
        let value = response.get_field(&field);

        scalar_to_string(&value).ok_or_else(|| InvokeError::MissingField(field_name.to_owned()))
    }

    async fn invoke(
        &self,
        method_full_name: &str,
        input_json: Option<&str>,
    ) -> Result<DynamicMessage, InvokeError> {
        let (service_name, method_name) = parse_method_full_name(method_full_name)?;
        let method = self.resolver.find_method(service_name, method_name).await?;

        let input = match input_json {
            Some(json) => {
                let mut deserializer = serde_json::Deserializer::from_str(json);
                let input = DynamicMessage::deserialize(method.input(), &mut deserializer)
                    .map_err(InvokeError::Encoding)?;
                deserializer.end().map_err(InvokeError::Encoding)?;
                input
            }

            None => DynamicMessage::new(method.input()),
        };

        let path = build_full_method_name(&method)
            .parse::<PathAndQuery>()
            .map_err(|_| InvokeError::InvalidMethodName(method_full_name.to_owned()))?;
        let codec = DynamicCodec::new(method.output());

        let mut grpc =
            Grpc::new(self.channel.clone()).max_decoding_message_size(self.max_recv_msg_size);
        grpc.ready().await.map_err(|error| {
            InvokeError::Transport(Status::unknown(format!("service was not ready: {error}")))
        })?;

        let response = grpc
            .unary(Request::new(input), path, codec)
            .await
            .map_err(InvokeError::Transport)?;

        Ok(response.into_inner())
    }

    /// Marshal the response to canonical protobuf JSON.
    ///
    /// `google.protobuf.Any` payloads are resolved against the pool that
    /// produced the message descriptor, so all reachable type URLs are resolved
    /// up front, fetching unknown types on demand; if that pulled in new files,
    /// the message is re-decoded against the refreshed pool before serializing.
    pub(crate) async fn marshal_canonical_json(
        &self,
        message: DynamicMessage,
    ) -> Result<Vec<u8>, InvokeError> {
        let fetched = self.resolve_any_types(&message).await?;

        let message = if fetched {
            let name = message.descriptor().full_name().to_owned();
            let encoded = message.encode_to_vec();

            let pool = self.resolver.pool().await;
            let descriptor = pool
                .get_message_by_name(&name)
                .ok_or(ResolverError::SymbolNotFound(name))?;
            DynamicMessage::decode(descriptor, encoded.as_slice())
                .map_err(|error| InvokeError::Decoding(error.into()))?
        } else {
            message
        };

        let mut json = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut json);
        message
            .serialize_with_options(&mut serializer, &SerializeOptions::new())
            .map_err(|error| InvokeError::Decoding(error.into()))?;

        Ok(json)
    }

    /// Walk all messages reachable from the given one, decoding `Any` payloads
    /// against their resolved descriptors so nested `Any` values are reached
    /// too. Returns whether any descriptor had to be fetched.
    async fn resolve_any_types(&self, message: &DynamicMessage) -> Result<bool, InvokeError> {
        let mut fetched = false;
        let mut queue = VecDeque::from([message.clone()]);

        while let Some(message) = queue.pop_front() {
            if message.descriptor().full_name() == ANY_TYPE {
                let Some(url) = message
                    .get_field_by_name(ANY_TYPE_URL_FIELD)
                    .as_deref()
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
                else {
                    continue;
                };
                if url.is_empty() {
                    continue;
                }

                let name = url.strip_prefix('/').unwrap_or(&url);
                let descriptor = match self.resolver.pool().await.get_message_by_name(name) {
                    Some(descriptor) => descriptor,

                    None => {
                        fetched = true;
                        self.resolver.find_message_by_url(&url).await?
                    }
                };

                let payload = message
                    .get_field_by_name(ANY_VALUE_FIELD)
                    .as_deref()
                    .and_then(Value::as_bytes)
                    .cloned();
                if let Some(payload) = payload {
                    // An undecodable payload is left for serialization to
                    // report.
                    if let Ok(payload) = DynamicMessage::decode(descriptor, payload) {
                        queue.push_back(payload);
                    }
                }
            } else {
                for (_, value) in message.fields() {
                    push_messages(value, &mut queue);
                }
            }
        }

        Ok(fetched)
    }
}

fn push_messages(value: &Value, queue: &mut VecDeque<DynamicMessage>) {
    match value {
        Value::Message(message) => queue.push_back(message.clone()),

        Value::List(values) => {
            for value in values {
                push_messages(value, queue);
            }
        }

        Value::Map(map) => {
            for value in map.values() {
                push_messages(value, queue);
            }
        }

        _ => {}
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_owned()),
        Value::U64(n) => Some(n.to_string()),
        Value::U32(n) => Some(n.to_string()),
        Value::I64(n) => Some(n.to_string()),
        Value::I32(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Split a fully-qualified, dot-separated method name into its service name
/// and its method name.
pub fn parse_method_full_name(method_full_name: &str) -> Result<(&str, &str), InvokeError> {
    let (service_name, method_name) = method_full_name
        .rsplit_once('.')
        .ok_or_else(|| InvokeError::InvalidMethodName(method_full_name.to_owned()))?;

    if service_name.is_empty() || method_name.is_empty() {
        return Err(InvokeError::InvalidMethodName(method_full_name.to_owned()));
    }

    Ok((service_name, method_name))
}

/// The gRPC wire path of a method: the fully-qualified method name with the
/// last dot replaced by a slash and a leading slash.
pub fn build_full_method_name(method: &MethodDescriptor) -> String {
    format!("/{}/{}", method.parent_service().full_name(), method.name())
}

/// A tonic codec over dynamic messages, decoding against a message descriptor
/// resolved at runtime.
#[derive(Debug, Clone)]
pub struct DynamicCodec {
    response: MessageDescriptor,
}

impl DynamicCodec {
    pub fn new(response: MessageDescriptor) -> Self {
        Self { response }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            response: self.response.clone(),
        }
    }
}

pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|error| Status::internal(error.to_string()))
    }
}

pub struct DynamicDecoder {
    response: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let message = DynamicMessage::decode(self.response.clone(), src)
            .map_err(|error| Status::internal(error.to_string()))?;
        Ok(Some(message))
    }
}

/// Error possibly returned by [Invoker] calls.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("invalid method full name {0}")]
    InvalidMethodName(String),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    /// The input JSON cannot be unmarshalled against the method input type.
    #[error("cannot unmarshal input parameters")]
    Encoding(#[source] serde_json::Error),

    /// The gRPC call itself failed.
    #[error("gRPC call failed")]
    Transport(#[source] Status),

    /// The response cannot be marshalled to canonical JSON.
    #[error("cannot marshal response to JSON")]
    Decoding(#[source] BoxError),

    #[error("field {0} not found in response")]
    MissingField(String),
}
