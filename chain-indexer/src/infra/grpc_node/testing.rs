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

//! Test fixtures: a small protocol schema and an in-process reflection server.

use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
    field_descriptor_proto::{Label, Type},
};
use std::error::Error as StdError;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint, Server};

/// Spawn an in-process reflection server serving the test schema and return a
/// channel connected to it.
pub async fn spawn_reflection_server() -> Result<Channel, Box<dyn StdError>> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let service = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(FileDescriptorSet {
            file: test_descriptors(),
        })
        .build_v1alpha()?;

    tokio::spawn(
        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );

    let channel = Endpoint::from_shared(format!("http://{addr}"))?
        .connect()
        .await?;

    Ok(channel)
}

/// A lazily connecting channel to an unreachable endpoint, for tests that
/// never issue a call.
pub fn disconnected_channel() -> Channel {
    Endpoint::from_static("http://127.0.0.1:1").connect_lazy()
}

/// The complete test schema.
pub fn test_descriptors() -> Vec<FileDescriptorProto> {
    vec![
        any_descriptor(),
        meta_descriptor(),
        extra_descriptor(),
        block_descriptor(),
        service_descriptor(),
    ]
}

/// A minimal `google/protobuf/any.proto`.
pub fn any_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("google/protobuf/any.proto".to_string()),
        package: Some("google.protobuf".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Any".to_string()),
            field: vec![
                field("type_url", "typeUrl", 1, Type::String, None),
                field("value", "value", 2, Type::Bytes, None),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// `test/v1/block.proto` with the `Block` and `TxRecord` messages.
pub fn block_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("test/v1/block.proto".to_string()),
        package: Some("test.v1".to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec!["google/protobuf/any.proto".to_string()],
        message_type: vec![
            DescriptorProto {
                name: Some("Block".to_string()),
                field: vec![
                    field("height", "height", 1, Type::Uint64, None),
                    repeated_field("txs", "txs", 2, Type::String, None),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("TxRecord".to_string()),
                field: vec![field(
                    "body",
                    "body",
                    1,
                    Type::Message,
                    Some(".google.protobuf.Any"),
                )],
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

/// `test/v1/service.proto` with the `BlockService` service.
pub fn service_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("test/v1/service.proto".to_string()),
        package: Some("test.v1".to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec!["test/v1/block.proto".to_string()],
        message_type: vec![
            DescriptorProto {
                name: Some("GetBlockRequest".to_string()),
                field: vec![field("height", "height", 1, Type::Uint64, None)],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("GetBlockResponse".to_string()),
                field: vec![field("block", "block", 1, Type::Message, Some(".test.v1.Block"))],
                ..Default::default()
            },
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("BlockService".to_string()),
            method: vec![MethodDescriptorProto {
                name: Some("GetBlock".to_string()),
                input_type: Some(".test.v1.GetBlockRequest".to_string()),
                output_type: Some(".test.v1.GetBlockResponse".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// `test/v1/extra.proto`; not registered up front in resolver tests and
/// depending on `test/v1/meta.proto` to exercise recursive dependency
/// fetching.
pub fn extra_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("test/v1/extra.proto".to_string()),
        package: Some("test.v1".to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec!["test/v1/meta.proto".to_string()],
        message_type: vec![DescriptorProto {
            name: Some("Extra".to_string()),
            field: vec![field("name", "name", 1, Type::String, None)],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// `test/v1/meta.proto`, a leaf dependency.
pub fn meta_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("test/v1/meta.proto".to_string()),
        package: Some("test.v1".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Meta".to_string()),
            field: vec![field("origin", "origin", 1, Type::String, None)],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A reduced `cosmos/base/abci/v1beta1/abci.proto` with the unpatched
/// `raw_log` string field.
pub fn abci_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("cosmos/base/abci/v1beta1/abci.proto".to_string()),
        package: Some("cosmos.base.abci.v1beta1".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("TxResponse".to_string()),
            field: vec![
                field("height", "height", 1, Type::Int64, None),
                field("raw_log", "rawLog", 2, Type::String, None),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn field(
    name: &str,
    json_name: &str,
    number: i32,
    r#type: Type,
    type_name: Option<&str>,
) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        json_name: Some(json_name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(r#type as i32),
        type_name: type_name.map(ToString::to_string),
        ..Default::default()
    }
}

fn repeated_field(
    name: &str,
    json_name: &str,
    number: i32,
    r#type: Type,
    type_name: Option<&str>,
) -> FieldDescriptorProto {
    FieldDescriptorProto {
        label: Some(Label::Repeated as i32),
        ..field(name, json_name, number, r#type, type_name)
    }
}
