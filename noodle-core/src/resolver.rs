//! # Catalog Resolution
//!
//! A session resolves its catalog exactly one way, picked up front:
//!
//! * [`FilesResolver`]: compiles local `.proto` sources. Never touches the network and
//!   never records call statistics.
//! * [`ReflectionResolver`]: queries the server reflection service under a deadline, with
//!   optional `v1` to `v1alpha` negotiation.
//!
//! Both modes are fail-fast. Either the whole catalog resolves or an error is returned.
pub mod files;
pub mod reflection;

use crate::{BoxError, StatusCode};
use crate::catalog::ServiceCatalog;
use crate::reflection::ReflectionResolveError;
use crate::registry::RegistrationError;
use crate::stats::StatsContext;
use http_body::Body as HttpBody;
use prost_types::FileDescriptorProto;
use std::path::PathBuf;
use std::time::Duration;
use tonic::client::GrpcService;
use tonic::transport::Channel;

pub use files::FilesResolver;
pub use reflection::ReflectionResolver;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to list proto files: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Failed to parse proto files: {0}")]
    Parse(#[source] protox::Error),
    #[error("Failed to compile proto files from import paths: {0}")]
    AdditionalFiles(#[source] protox::Error),
    #[error(transparent)]
    Reflection(#[from] ReflectionResolveError),
    #[error("Resolution did not complete within {0:?}")]
    DeadlineExceeded(Duration),
    #[error("Resolution was cancelled")]
    Cancelled,
    #[error("Resolved descriptors are inconsistent: {0}")]
    Descriptor(#[from] RegistrationError),
    #[error("Server listed service '{0}' but no resolved file declares it")]
    MissingService(String),
}

impl StatusCode for ResolveError {
    fn code(&self) -> tonic::Code {
        match self {
            ResolveError::Io { .. } | ResolveError::Walk(_) => tonic::Code::NotFound,
            ResolveError::Parse(_) | ResolveError::AdditionalFiles(_) => {
                tonic::Code::InvalidArgument
            }
            ResolveError::Reflection(e) => e.code(),
            ResolveError::DeadlineExceeded(_) => tonic::Code::DeadlineExceeded,
            ResolveError::Cancelled => tonic::Code::Cancelled,
            ResolveError::Descriptor(_) | ResolveError::MissingService(_) => {
                tonic::Code::Internal
            }
        }
    }
}

/// The resolution strategy of a session.
pub enum CatalogResolver<S = Channel> {
    Files(FilesResolver),
    Reflection(ReflectionResolver<S>),
}

impl<S> CatalogResolver<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Resolves the catalog. Reflection exchanges are recorded into `stats`.
    pub async fn resolve(&mut self, stats: &mut StatsContext) -> Result<ServiceCatalog, ResolveError> {
        match self {
            CatalogResolver::Files(resolver) => resolver.resolve(),
            CatalogResolver::Reflection(resolver) => resolver.resolve(stats).await,
        }
    }

    /// Descriptor files compiled from the import directories, beyond what the catalog needs.
    pub fn additional_files(&self) -> Result<Vec<FileDescriptorProto>, ResolveError> {
        files::additional_files(self.imports())
    }

    pub fn imports(&self) -> &[PathBuf] {
        match self {
            CatalogResolver::Files(resolver) => resolver.imports(),
            CatalogResolver::Reflection(resolver) => resolver.imports(),
        }
    }
}
