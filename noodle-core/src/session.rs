//! # Session Bootstrap
//!
//! A [`Session`] is what the CLI works with once the catalog of a target is known:
//!
//! 1. The user options are turned into a [`ConnectionConfig`].
//! 2. A [`CatalogResolver`] is picked: local files when any proto path is given, reflection
//!    against the target otherwise.
//! 3. The catalog is resolved, and every descriptor file it carries, plus whatever the
//!    import directories contain, is registered into a session-owned [`DescriptorRegistry`].
//!
//! Bootstrap results come back as [`Diagnosed`], so the statistics of the last reflection
//! exchange stay available when resolution fails.
use crate::catalog::ServiceCatalog;
use crate::connection::{
    ConnOption, Connection, ConnectionConfig, ConnectionError, ConnectionFactory, Headers,
    TlsPolicy, with_authority, with_headers, with_keepalive, with_max_receive_message_size,
    with_tls,
};
use crate::reflection::ReflectVersion;
use crate::registry::{DescriptorRegistry, RegistrationError};
use crate::resolver::{CatalogResolver, FilesResolver, ReflectionResolver, ResolveError};
use crate::stats::{CallStats, StatsContext};
use crate::{BoxError, StatusCode};
use http_body::Body as HttpBody;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::client::GrpcService;

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(15);

/// User-level options a session is bootstrapped from.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `host:port` of the server. Only contacted in reflection mode.
    pub target: String,
    pub deadline: Duration,
    pub reflect_version: ReflectVersion,
    /// Proto files or directories. Any entry selects files mode.
    pub protos: Vec<PathBuf>,
    pub imports: Vec<PathBuf>,
    pub tls: bool,
    pub insecure: bool,
    pub cacert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub certkey: Option<PathBuf>,
    pub authority: String,
    pub keepalive: bool,
    pub keepalive_time: Duration,
    pub max_receive_message_size: usize,
    pub headers: Headers,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            target: String::new(),
            deadline: DEFAULT_DEADLINE,
            reflect_version: ReflectVersion::default(),
            protos: Vec::new(),
            imports: Vec::new(),
            tls: false,
            insecure: false,
            cacert: None,
            cert: None,
            certkey: None,
            authority: String::new(),
            keepalive: false,
            keepalive_time: Duration::ZERO,
            max_receive_message_size: 0,
            headers: Headers::new(),
        }
    }
}

impl SessionOptions {
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut options: Vec<ConnOption> = vec![
            with_authority(self.authority.clone()),
            with_keepalive(self.keepalive, self.keepalive_time),
        ];

        if self.tls {
            options.push(with_tls(TlsPolicy {
                insecure: self.insecure,
                ca_cert: self.cacert.clone(),
                cert: self.cert.clone(),
                cert_key: self.certkey.clone(),
            }));
        }

        if self.max_receive_message_size > 0 {
            options.push(with_max_receive_message_size(self.max_receive_message_size));
        }

        if !self.headers.is_empty() {
            options.push(with_headers(self.headers.clone()));
        }

        ConnectionConfig::new(options)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl StatusCode for SessionError {
    fn code(&self) -> tonic::Code {
        match self {
            SessionError::Connection(e) => e.code(),
            SessionError::Resolve(e) => e.code(),
        }
    }
}

/// A result paired with the statistics of the last call made while producing it.
#[derive(Debug)]
pub struct Diagnosed<T, E> {
    pub result: Result<T, E>,
    pub stats: Option<CallStats>,
}

impl<T, E> Diagnosed<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

#[derive(Debug)]
pub struct Session {
    factory: ConnectionFactory,
    catalog: ServiceCatalog,
    registry: DescriptorRegistry,
    registration_error: Option<RegistrationError>,
}

impl Session {
    /// Resolves the catalog for `options`. Reflection stops early when `cancel` fires.
    pub async fn bootstrap(
        options: &SessionOptions,
        cancel: CancellationToken,
    ) -> Diagnosed<Session, SessionError> {
        let factory = options.connection_config().factory();

        if !options.protos.is_empty() {
            let resolver = FilesResolver::new(options.protos.clone(), options.imports.clone());
            return Self::from_resolver::<tonic::transport::Channel>(
                factory,
                CatalogResolver::Files(resolver),
            )
            .await;
        }

        let connection = match factory.connect_lazy(&options.target) {
            Ok(connection) => connection,
            Err(e) => {
                return Diagnosed {
                    result: Err(e.into()),
                    stats: None,
                };
            }
        };

        let resolver =
            ReflectionResolver::from_connection(&connection, options.deadline, options.reflect_version)
                .with_imports(options.imports.clone())
                .with_cancellation(cancel);

        Self::from_resolver(factory, CatalogResolver::Reflection(resolver)).await
    }

    /// Bootstraps a session from an already selected resolver.
    pub async fn from_resolver<S>(
        factory: ConnectionFactory,
        mut resolver: CatalogResolver<S>,
    ) -> Diagnosed<Session, SessionError>
    where
        S: GrpcService<tonic::body::Body>,
        S::Error: Into<BoxError>,
        S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
        <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    {
        let mut stats = StatsContext::new();
        let result = Self::resolve(factory, &mut resolver, &mut stats).await;

        Diagnosed {
            result,
            stats: stats.snapshot(),
        }
    }

    async fn resolve<S>(
        factory: ConnectionFactory,
        resolver: &mut CatalogResolver<S>,
        stats: &mut StatsContext,
    ) -> Result<Session, SessionError>
    where
        S: GrpcService<tonic::body::Body>,
        S::Error: Into<BoxError>,
        S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
        <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    {
        let catalog = resolver.resolve(stats).await?;
        let additional = resolver.additional_files()?;

        let registry = DescriptorRegistry::new();
        let registration_error = registry
            .register(catalog.files().iter().cloned().chain(additional))
            .err();

        if let Some(e) = &registration_error {
            tracing::debug!(error = %e, "Some descriptor files were not registered");
        }

        tracing::debug!(
            services = catalog.services().len(),
            files = registry.file_names().len(),
            "Session ready"
        );

        Ok(Session {
            factory,
            catalog,
            registry,
            registration_error,
        })
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Files that failed validation during bootstrap. Advisory: the rest of the catalog is usable.
    pub fn registration_error(&self) -> Option<&RegistrationError> {
        self.registration_error.as_ref()
    }

    /// A connection to `target` under the session's connection policy. It dials on first
    /// use, so the caller's deadline covers connection establishment too.
    pub fn connect(&self, target: &str) -> Result<Connection, ConnectionError> {
        self.factory.connect_lazy(target)
    }
}
