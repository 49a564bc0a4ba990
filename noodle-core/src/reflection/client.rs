//! # Reflection Client
//!
//! Issues `ServerReflectionInfo` exchanges for either protocol version and records every
//! exchange into the caller's [`StatsContext`].
//!
//! Symbol lookups are recursive: the server returns a `FileDescriptorProto`, the client
//! inspects its imports and keeps requesting missing files by name, on the same stream,
//! until the whole dependency tree is collected.
use super::{DescriptorCollection, ProtocolVersion};
use crate::BoxError;
use crate::connection::Connection;
use crate::stats::StatsContext;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};
use tonic_prost::ProstCodec;
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),

    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),
}

impl ReflectionResolveError {
    /// Whether the server does not implement the requested reflection version.
    pub fn is_unimplemented(&self) -> bool {
        match self {
            ReflectionResolveError::ServerStreamInitFailed(status)
            | ReflectionResolveError::ServerStreamFailure(status) => {
                status.code() == tonic::Code::Unimplemented
            }
            _ => false,
        }
    }
}

impl crate::StatusCode for ReflectionResolveError {
    fn code(&self) -> tonic::Code {
        match self {
            ReflectionResolveError::ServerStreamInitFailed(status)
            | ReflectionResolveError::ServerStreamFailure(status) => status.code(),
            ReflectionResolveError::ServerError { code, .. } => tonic::Code::from_i32(*code),
            ReflectionResolveError::ClientNotReady(_) | ReflectionResolveError::StreamClosed => {
                tonic::Code::Unavailable
            }
            ReflectionResolveError::SendFailed
            | ReflectionResolveError::UnexpectedResponseType(_)
            | ReflectionResolveError::DecodeError(_) => tonic::Code::Internal,
        }
    }
}

// The host field of reflection requests is optional and servers ignore it.
const EMPTY_HOST: &str = "";

/// A client for the gRPC Server Reflection Protocol, generic over the transport.
pub struct ReflectionClient<S = Channel> {
    client: tonic::client::Grpc<S>,
    headers: MetadataMap,
    deadline: Option<Instant>,
}

impl ReflectionClient<Channel> {
    /// Builds a client that carries the connection's extra metadata and message limit.
    pub fn from_connection(connection: &Connection) -> Self {
        let mut client =
            Self::new(connection.channel()).with_headers(connection.headers().clone());
        if let Some(limit) = connection.max_receive_message_size() {
            client.client = client.client.max_decoding_message_size(limit);
        }
        client
    }
}

impl<S> ReflectionClient<S>
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
            deadline: None,
        }
    }

    /// Metadata attached to every exchange.
    pub fn with_headers(mut self, headers: MetadataMap) -> Self {
        self.headers = headers;
        self
    }

    /// Every exchange advertises the time left until `deadline` as its `grpc-timeout`.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(
        &mut self,
        version: ProtocolVersion,
        stats: &mut StatsContext,
    ) -> Result<Vec<String>, ReflectionResolveError> {
        let result = self.list_services_exchange(version, stats).await;
        stats.finish();
        result
    }

    /// Collects the file declaring `symbol` and all of its transitive imports into
    /// `collection`. Files already present in the collection are neither requested nor
    /// replaced.
    pub async fn collect_symbol(
        &mut self,
        version: ProtocolVersion,
        symbol: &str,
        collection: &mut DescriptorCollection,
        stats: &mut StatsContext,
    ) -> Result<(), ReflectionResolveError> {
        let result = self
            .collect_symbol_exchange(version, symbol, collection, stats)
            .await;
        stats.finish();
        result
    }

    async fn list_services_exchange(
        &mut self,
        version: ProtocolVersion,
        stats: &mut StatsContext,
    ) -> Result<Vec<String>, ReflectionResolveError> {
        let mut exchange = self
            .open(version, MessageRequest::ListServices(String::new()), stats)
            .await?;

        let services = match exchange.next(stats).await? {
            MessageResponse::ListServicesResponse(resp) => {
                resp.service.into_iter().map(|s| s.name).collect()
            }
            other => {
                return Err(ReflectionResolveError::UnexpectedResponseType(format!(
                    "{other:?}"
                )));
            }
        };

        exchange.close(stats).await;
        Ok(services)
    }

    async fn collect_symbol_exchange(
        &mut self,
        version: ProtocolVersion,
        symbol: &str,
        collection: &mut DescriptorCollection,
        stats: &mut StatsContext,
    ) -> Result<(), ReflectionResolveError> {
        let request = MessageRequest::FileContainingSymbol(symbol.to_string());
        let mut exchange = self.open(version, request, stats).await?;

        collect_descriptors(&mut exchange, collection, stats).await?;

        exchange.close(stats).await;
        Ok(())
    }

    /// Starts a new stream on the `version` path, with `first` already queued.
    async fn open(
        &mut self,
        version: ProtocolVersion,
        first: MessageRequest,
        stats: &mut StatsContext,
    ) -> Result<Exchange, ReflectionResolveError> {
        let path = version.path();
        stats.begin(path.as_str());

        self.client
            .ready()
            .await
            .map_err(|e| ReflectionResolveError::ClientNotReady(e.into()))?;

        let (tx, rx) = mpsc::channel(100);
        send(&tx, first, stats).await?;

        let mut request = tonic::Request::new(ReceiverStream::new(rx));
        *request.metadata_mut() = self.headers.clone();
        if let Some(deadline) = self.deadline {
            request.set_timeout(deadline.saturating_duration_since(Instant::now()));
        }
        stats.record_request_headers(request.metadata());

        let codec: ProstCodec<ServerReflectionRequest, ServerReflectionResponse> =
            ProstCodec::default();

        match self.client.streaming(request, path, codec).await {
            Ok(response) => {
                stats.record_response_headers(response.metadata());
                Ok(Exchange {
                    tx,
                    responses: response.into_inner(),
                })
            }
            Err(status) => {
                stats.record_trailers(status.metadata());
                Err(ReflectionResolveError::ServerStreamInitFailed(status))
            }
        }
    }
}

struct Exchange {
    tx: mpsc::Sender<ServerReflectionRequest>,
    responses: Streaming<ServerReflectionResponse>,
}

impl Exchange {
    async fn next(
        &mut self,
        stats: &mut StatsContext,
    ) -> Result<MessageResponse, ReflectionResolveError> {
        let response = match self.responses.message().await {
            Ok(Some(response)) => response,
            Ok(None) => return Err(ReflectionResolveError::StreamClosed),
            Err(status) => {
                stats.record_trailers(status.metadata());
                return Err(ReflectionResolveError::ServerStreamFailure(status));
            }
        };

        stats.add_response_bytes(response.encoded_len());

        match response.message_response {
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(message) => Ok(message),
            None => Err(ReflectionResolveError::UnexpectedResponseType(
                "Empty Message".into(),
            )),
        }
    }

    /// Half-closes the stream and waits for the server's trailers.
    async fn close(self, stats: &mut StatsContext) {
        let Exchange { tx, mut responses } = self;
        drop(tx);

        match responses.trailers().await {
            Ok(Some(trailers)) => stats.record_trailers(&trailers),
            Ok(None) => {}
            Err(status) => stats.record_trailers(status.metadata()),
        }
    }
}

async fn send(
    tx: &mpsc::Sender<ServerReflectionRequest>,
    message: MessageRequest,
    stats: &mut StatsContext,
) -> Result<(), ReflectionResolveError> {
    let request = ServerReflectionRequest {
        host: EMPTY_HOST.to_string(),
        message_request: Some(message),
    };

    stats.add_request_bytes(request.encoded_len());

    tx.send(request)
        .await
        .map_err(|_| ReflectionResolveError::SendFailed)
}

async fn collect_descriptors(
    exchange: &mut Exchange,
    collection: &mut DescriptorCollection,
    stats: &mut StatsContext,
) -> Result<(), ReflectionResolveError> {
    let mut inflight = 1;
    let mut requested = HashSet::new();

    while inflight > 0 {
        let response = exchange.next(stats).await?;
        inflight -= 1;

        match response {
            MessageResponse::FileDescriptorResponse(res) => {
                inflight += process_descriptor_batch(
                    res.file_descriptor_proto,
                    collection,
                    &mut requested,
                    &exchange.tx,
                    stats,
                )
                .await?;
            }
            other => {
                return Err(ReflectionResolveError::UnexpectedResponseType(format!(
                    "{other:?}"
                )));
            }
        }
    }

    Ok(())
}

async fn process_descriptor_batch(
    raw_protos: Vec<Vec<u8>>,
    collection: &mut DescriptorCollection,
    requested: &mut HashSet<String>,
    tx: &mpsc::Sender<ServerReflectionRequest>,
    stats: &mut StatsContext,
) -> Result<usize, ReflectionResolveError> {
    let mut sent_count = 0;

    for raw in raw_protos {
        let fd = FileDescriptorProto::decode(raw.as_ref())?;

        if fd.name.is_some() && !collection.contains(fd.name()) {
            sent_count += queue_dependencies(&fd, collection, requested, tx, stats).await?;
            collection.insert(fd);
        }
    }

    Ok(sent_count)
}

async fn queue_dependencies(
    fd: &FileDescriptorProto,
    collection: &DescriptorCollection,
    requested: &mut HashSet<String>,
    tx: &mpsc::Sender<ServerReflectionRequest>,
    stats: &mut StatsContext,
) -> Result<usize, ReflectionResolveError> {
    let mut count = 0;

    for dep in &fd.dependency {
        if !collection.contains(dep) && requested.insert(dep.clone()) {
            send(tx, MessageRequest::FileByFilename(dep.clone()), stats).await?;
            count += 1;
        }
    }

    Ok(count)
}
