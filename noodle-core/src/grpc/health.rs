//! Client for the standard `grpc.health.v1.Health/Check` probe.
use crate::BoxError;
use crate::stats::StatsContext;
use http_body::Body as HttpBody;
use prost::Message;
use tonic::{Status, client::GrpcService, metadata::MetadataMap};
use tonic_health::pb::{HealthCheckRequest, health_client::HealthClient};

pub use tonic_health::pb::health_check_response::ServingStatus;

const CHECK_PATH: &str = "/grpc.health.v1.Health/Check";

/// Asks the server for the health of `service`; an empty name means the server as a whole.
pub async fn check<S>(
    service: S,
    name: &str,
    headers: &MetadataMap,
    stats: &mut StatsContext,
) -> Result<ServingStatus, Status>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let message = HealthCheckRequest {
        service: name.to_string(),
    };

    stats.begin(CHECK_PATH);
    stats.add_request_bytes(message.encoded_len());

    let mut request = tonic::Request::new(message);
    *request.metadata_mut() = headers.clone();
    stats.record_request_headers(request.metadata());

    let result = match HealthClient::new(service).check(request).await {
        Ok(response) => {
            stats.record_response_headers(response.metadata());
            let response = response.into_inner();
            stats.add_response_bytes(response.encoded_len());
            Ok(response.status())
        }
        Err(status) => {
            stats.record_trailers(status.metadata());
            Err(status)
        }
    };

    stats.finish();
    result
}
