//! # Dynamic gRPC Client
//!
//! Wraps a `tonic::client::Grpc` to call any method given its [`MethodDescriptor`].
//!
//! ## How it works
//!
//! The [`GrpcClient`] builds the HTTP/2 path (`/package.Service/Method`) at runtime and
//! hands the messages to a [`DynamicCodec`]. The call shape (unary, server streaming, client
//! streaming, bidirectional) is taken from the descriptor's streaming flags.
//!
//! Every call is recorded into the caller's [`StatsContext`].
use super::codec::DynamicCodec;
use crate::BoxError;
use crate::connection::Connection;
use crate::stats::StatsContext;
use http_body::Body as HttpBody;
use prost::Message;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::{Status, Streaming, client::GrpcService, metadata::MetadataMap, transport::Channel};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid method path '{path}': {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: http::uri::InvalidUri,
    },
    #[error("Method '{method}' takes exactly one request message, got {count}")]
    UnexpectedMessageCount { method: String, count: usize },
}

impl crate::StatusCode for GrpcRequestError {
    fn code(&self) -> tonic::Code {
        match self {
            GrpcRequestError::ClientNotReady(_) => tonic::Code::Unavailable,
            GrpcRequestError::InvalidPath { .. }
            | GrpcRequestError::UnexpectedMessageCount { .. } => tonic::Code::InvalidArgument,
        }
    }
}

pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
    headers: MetadataMap,
    timeout: Option<Duration>,
}

impl GrpcClient<Channel> {
    /// Builds a client that carries the connection's extra metadata and message limit.
    pub fn from_connection(connection: &Connection) -> Self {
        let mut client = Self::new(connection.channel()).with_headers(connection.headers().clone());
        if let Some(limit) = connection.max_receive_message_size() {
            client.client = client.client.max_decoding_message_size(limit);
        }
        client
    }
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            client: tonic::client::Grpc::new(service),
            headers: MetadataMap::new(),
            timeout: None,
        }
    }

    pub fn with_headers(mut self, headers: MetadataMap) -> Self {
        self.headers = headers;
        self
    }

    /// Advertised to the server as the call's `grpc-timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Calls `method` with `messages`, using the call shape its descriptor declares.
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(messages))` - Successful RPC execution, every response message in order.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - The call could not be issued.
    pub async fn call(
        &mut self,
        method: &MethodDescriptor,
        messages: Vec<DynamicMessage>,
        stats: &mut StatsContext,
    ) -> Result<Result<Vec<DynamicMessage>, Status>, GrpcRequestError> {
        let path = http_path(method)?;
        stats.begin(path.as_str());

        let result = self.dispatch(method, path, messages, stats).await;
        stats.finish();
        result
    }

    async fn dispatch(
        &mut self,
        method: &MethodDescriptor,
        path: http::uri::PathAndQuery,
        messages: Vec<DynamicMessage>,
        stats: &mut StatsContext,
    ) -> Result<Result<Vec<DynamicMessage>, Status>, GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let codec = DynamicCodec::new(method.output());
        for message in &messages {
            stats.add_request_bytes(message.encoded_len());
        }

        if method.is_client_streaming() {
            let request = self.request(tokio_stream::iter(messages), stats);

            if method.is_server_streaming() {
                return Ok(match self.client.streaming(request, path, codec).await {
                    Ok(response) => drain(response, stats).await,
                    Err(status) => Err(failed(status, stats)),
                });
            }

            return Ok(match self.client.client_streaming(request, path, codec).await {
                Ok(response) => Ok(vec![single(response, stats)]),
                Err(status) => Err(failed(status, stats)),
            });
        }

        let message = match <[DynamicMessage; 1]>::try_from(messages) {
            Ok([message]) => message,
            Err(messages) => {
                return Err(GrpcRequestError::UnexpectedMessageCount {
                    method: method.full_name().to_string(),
                    count: messages.len(),
                });
            }
        };
        let request = self.request(message, stats);

        if method.is_server_streaming() {
            return Ok(match self.client.server_streaming(request, path, codec).await {
                Ok(response) => drain(response, stats).await,
                Err(status) => Err(failed(status, stats)),
            });
        }

        Ok(match self.client.unary(request, path, codec).await {
            Ok(response) => Ok(vec![single(response, stats)]),
            Err(status) => Err(failed(status, stats)),
        })
    }

    fn request<T>(&self, payload: T, stats: &mut StatsContext) -> tonic::Request<T> {
        let mut request = tonic::Request::new(payload);
        *request.metadata_mut() = self.headers.clone();
        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }
        stats.record_request_headers(request.metadata());
        request
    }
}

/// Drives `call` until it completes, `deadline` elapses or `cancel` fires.
///
/// Connections from [`crate::connection::ConnectionFactory::connect_lazy`] dial on first
/// use, so wrapping the call bounds the dial as well.
pub async fn within<F: Future>(
    deadline: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<F::Output, Status> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Status::cancelled("Call cancelled")),
        result = tokio::time::timeout(deadline, call) => {
            result.map_err(|_| Status::deadline_exceeded(format!("Deadline of {deadline:?} exceeded")))
        }
    }
}

fn single(response: tonic::Response<DynamicMessage>, stats: &mut StatsContext) -> DynamicMessage {
    // Unary responses arrive with headers and trailers merged.
    stats.record_response_headers(response.metadata());
    let message = response.into_inner();
    stats.add_response_bytes(message.encoded_len());
    message
}

async fn drain(
    response: tonic::Response<Streaming<DynamicMessage>>,
    stats: &mut StatsContext,
) -> Result<Vec<DynamicMessage>, Status> {
    stats.record_response_headers(response.metadata());
    let mut stream = response.into_inner();
    let mut messages = Vec::new();

    loop {
        match stream.message().await {
            Ok(Some(message)) => {
                stats.add_response_bytes(message.encoded_len());
                messages.push(message);
            }
            Ok(None) => break,
            Err(status) => return Err(failed(status, stats)),
        }
    }

    if let Ok(Some(trailers)) = stream.trailers().await {
        stats.record_trailers(&trailers);
    }

    Ok(messages)
}

fn failed(status: Status, stats: &mut StatsContext) -> Status {
    stats.record_trailers(status.metadata());
    status
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path)
        .map_err(|source| GrpcRequestError::InvalidPath { path, source })
}
