//! # Reflection Resolver
//!
//! Builds the catalog by asking the live server: one `ListServices` exchange, then one
//! `FileContainingSymbol` exchange per service whose file was not collected yet.
//!
//! The whole sequence, including a version fallback, runs under a single deadline and
//! stops as soon as the cancellation token fires. Nothing partial is ever returned.
use super::ResolveError;
use crate::BoxError;
use crate::StatusCode;
use crate::catalog::{ServiceCatalog, ServiceMeta};
use crate::connection::Connection;
use crate::reflection::{DescriptorCollection, ProtocolVersion, ReflectVersion, ReflectionClient};
use crate::registry::DescriptorRegistry;
use crate::stats::StatsContext;
use http_body::Body as HttpBody;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::client::GrpcService;
use tonic::transport::Channel;

pub struct ReflectionResolver<S = Channel> {
    client: ReflectionClient<S>,
    deadline: Duration,
    version: ReflectVersion,
    imports: Vec<PathBuf>,
    cancel: CancellationToken,
}

impl ReflectionResolver<Channel> {
    pub fn from_connection(
        connection: &Connection,
        deadline: Duration,
        version: ReflectVersion,
    ) -> Self {
        Self::new(
            ReflectionClient::from_connection(connection),
            deadline,
            version,
        )
    }
}

impl<S> ReflectionResolver<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(client: ReflectionClient<S>, deadline: Duration, version: ReflectVersion) -> Self {
        Self {
            client,
            deadline,
            version,
            imports: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Directories compiled for [`super::CatalogResolver::additional_files`].
    pub fn with_imports(mut self, imports: Vec<PathBuf>) -> Self {
        self.imports = imports;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn imports(&self) -> &[PathBuf] {
        &self.imports
    }

    pub async fn resolve(&mut self, stats: &mut StatsContext) -> Result<ServiceCatalog, ResolveError> {
        let budget = self.deadline;
        let deadline = Instant::now() + budget;
        let cancel = self.cancel.clone();
        self.client.set_deadline(deadline);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            outcome = tokio::time::timeout_at(deadline, self.negotiate(stats)) => outcome,
        };

        match outcome {
            Err(_elapsed) => Err(ResolveError::DeadlineExceeded(budget)),
            // The server enforces the advertised grpc-timeout too, and may answer first.
            Ok(Err(ResolveError::Reflection(e))) if e.code() == tonic::Code::DeadlineExceeded => {
                Err(ResolveError::DeadlineExceeded(budget))
            }
            Ok(result) => result,
        }
    }

    async fn negotiate(&mut self, stats: &mut StatsContext) -> Result<ServiceCatalog, ResolveError> {
        let primary = self.version.primary();

        let (version, services) = match self.client.list_services(primary, stats).await {
            Ok(services) => (primary, services),
            Err(e) if self.version.negotiates() && e.is_unimplemented() => {
                let alternate = primary.alternate();
                tracing::debug!(%primary, %alternate, "Reflection version not implemented, retrying");
                (alternate, self.client.list_services(alternate, stats).await?)
            }
            Err(e) => return Err(e.into()),
        };

        self.fetch(version, services, stats).await
    }

    /// The version is pinned from here on: a later `Unimplemented` is a hard failure.
    async fn fetch(
        &mut self,
        version: ProtocolVersion,
        services: Vec<String>,
        stats: &mut StatsContext,
    ) -> Result<ServiceCatalog, ResolveError> {
        let mut collection = DescriptorCollection::new();

        for service in &services {
            if collection.declares_service(service) {
                continue;
            }
            self.client
                .collect_symbol(version, service, &mut collection, stats)
                .await?;
        }

        tracing::debug!(
            %version,
            services = services.len(),
            files = collection.len(),
            "Collected descriptors through reflection"
        );

        let files = collection.into_files();
        let scratch = DescriptorRegistry::new();
        scratch.register(files.clone())?;
        let pool = scratch.pool();

        let services = services
            .iter()
            .map(|name| {
                pool.get_service_by_name(name)
                    .map(ServiceMeta::from)
                    .ok_or_else(|| ResolveError::MissingService(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ServiceCatalog::new(services, files))
    }
}
