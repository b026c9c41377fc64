//! Unary gRPC calls against the service under test.
//!
//! No descriptors are needed: the request is a two-field message
//! (`1: identifier`, `2: mutation`, both strings) and the response body is
//! only checked for being decodable. Every iteration opens its own channel so
//! that sessions are never shared between workers or iterations.

use crate::config::TargetSettings;
use crate::error::{CallError, ConfigError};
use crate::performance::outcome::{Reply, StatusValue};
use crate::performance::payload::Payload;
use crate::performance::target::{Connector, Session};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::error::Error as StdError;
use std::time::Duration;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Request, Status};
use tracing::trace;

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireRequest {
    #[prost(string, tag = "1")]
    pub identifier: String,
    #[prost(string, tag = "2")]
    pub mutation: String,
}

impl From<&Payload> for WireRequest {
    fn from(payload: &Payload) -> Self {
        Self {
            identifier: payload.identifier.clone(),
            mutation: payload.mutation.clone().unwrap_or_default(),
        }
    }
}

/// Any response message. Unknown fields are skipped on decode.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OpaqueReply {}

pub struct GrpcConnector {
    endpoint: Endpoint,
    address: String,
    path: PathAndQuery,
    metadata: MetadataMap,
    call_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(target: &TargetSettings) -> Result<Self, ConfigError> {
        let invalid_endpoint = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: target.endpoint.clone(),
            reason,
        };

        let mut endpoint = Endpoint::from_shared(target.endpoint.clone())
            .map_err(|e| invalid_endpoint(e.to_string()))?
            .connect_timeout(target.connect_timeout)
            .timeout(target.call_timeout);

        if target.tls {
            let mut tls = ClientTlsConfig::new();
            if let Some(domain) = &target.tls_domain {
                tls = tls.domain_name(domain.clone());
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| invalid_endpoint(e.to_string()))?;
        }

        let path = PathAndQuery::try_from(format!("/{}", target.method))
            .map_err(|_| ConfigError::InvalidMethod(target.method.clone()))?;

        Ok(Self {
            endpoint,
            address: format!("{} {}", target.endpoint, target.method),
            path,
            metadata: build_metadata(&target.metadata)?,
            call_timeout: target.call_timeout,
        })
    }
}

pub fn build_metadata(entries: &IndexMap<String, String>) -> Result<MetadataMap, ConfigError> {
    let mut metadata = MetadataMap::new();
    for (key, value) in entries {
        let key = AsciiMetadataKey::from_bytes(key.as_bytes())
            .map_err(|_| ConfigError::InvalidMetadata(format!("invalid key '{}'", key)))?;
        let value: AsciiMetadataValue = value
            .parse()
            .map_err(|_| ConfigError::InvalidMetadata(format!("invalid value for '{}'", key)))?;
        metadata.insert(key, value);
    }
    Ok(metadata)
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, CallError> {
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| CallError::Connection(error_chain(&e)))?;

        Ok(Box::new(GrpcSession {
            client: Grpc::new(channel),
            path: self.path.clone(),
            metadata: self.metadata.clone(),
            call_timeout: self.call_timeout,
        }))
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}

pub struct GrpcSession {
    client: Grpc<Channel>,
    path: PathAndQuery,
    metadata: MetadataMap,
    call_timeout: Duration,
}

#[async_trait]
impl Session for GrpcSession {
    async fn invoke(&mut self, payload: &Payload) -> Result<Reply, CallError> {
        self.client
            .ready()
            .await
            .map_err(|e| CallError::Connection(error_chain(&e)))?;

        let mut request = Request::new(WireRequest::from(payload));
        *request.metadata_mut() = self.metadata.clone();
        request.set_timeout(self.call_timeout);

        let codec: ProstCodec<WireRequest, OpaqueReply> = ProstCodec::default();
        match self.client.unary(request, self.path.clone(), codec).await {
            Ok(_) => Ok(Reply::ok()),
            Err(status) => {
                trace!(code = ?status.code(), message = status.message(), "call returned status");
                status_to_reply(status, self.call_timeout)
            }
        }
    }
}

/// Map a gRPC status onto the four failure kinds. Statuses the server chose
/// to return come back as a [`Reply`] and are classified like any other.
pub fn status_to_reply(status: Status, call_timeout: Duration) -> Result<Reply, CallError> {
    let from_transport = status.source().is_some();
    match status.code() {
        Code::DeadlineExceeded => Err(CallError::Timeout(call_timeout)),
        Code::Unavailable | Code::Unknown | Code::Cancelled if from_transport => {
            Err(CallError::Connection(error_chain(&status)))
        }
        Code::Internal if status.message().starts_with("failed to decode") => {
            Err(CallError::Malformed(status.message().to_string()))
        }
        code => Ok(Reply {
            status: Some(StatusValue::Number(code as i64)),
            message: Some(status.message().to_string()),
        }),
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
