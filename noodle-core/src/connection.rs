//! # Connection Policy
//!
//! A [`ConnectionConfig`] is assembled by applying independent [`ConnOption`]s to a default
//! configuration. Every option owns a single concern (TLS, authority, keepalive, message
//! size, headers), so the order in which options are applied never changes the result.
//!
//! Options never fail. Contradictory settings, such as a client certificate without its key,
//! surface as a [`ConnectionError`] when a transport is established from the configuration.
//!
//! The resulting [`ConnectionFactory`] is immutable and cheap to clone: the same policy can
//! produce connections to any number of targets.
//!
//! ## Example
//!
//! ```rust,no_run
//! use noodle_core::connection::{ConnectionConfig, with_authority, with_max_receive_message_size};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = ConnectionConfig::new([
//!     with_authority("api.internal"),
//!     with_max_receive_message_size(16 * 1024 * 1024),
//! ])
//! .factory();
//!
//! let connection = factory.connect_lazy("localhost:50051")?;
//! # Ok(())
//! # }
//! ```
mod insecure;

use insecure::InsecureConnector;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tonic::{
    metadata::{
        AsciiMetadataKey, AsciiMetadataValue, MetadataMap,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity, Uri},
};

/// Extra metadata attached to every call: header name to its ordered values.
pub type Headers = BTreeMap<String, Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid target '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("Invalid authority override '{authority}': {source}")]
    InvalidAuthority {
        authority: String,
        #[source]
        source: http::uri::InvalidUri,
    },
    #[error("A client certificate and its private key must be provided together")]
    IncompleteIdentity,
    #[error("Failed to read '{path}': {source}")]
    ReadCertificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No private key found in '{0}'")]
    MissingPrivateKey(PathBuf),
    #[error("Invalid TLS configuration: {0}")]
    Tls(#[source] tonic::transport::Error),
    #[error("Invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
    #[error("Failed to connect to '{target}': {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },
}

impl crate::StatusCode for ConnectionError {
    fn code(&self) -> tonic::Code {
        match self {
            ConnectionError::ConnectFailed { .. } => tonic::Code::Unavailable,
            _ => tonic::Code::InvalidArgument,
        }
    }
}

/// TLS settings. Their presence in a [`ConnectionConfig`] is what enables TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Skip the server certificate chain and host name verification. The CA file is ignored.
    pub insecure: bool,
    /// PEM file with the CA used to verify the server. Native roots are used when absent.
    pub ca_cert: Option<PathBuf>,
    /// PEM client certificate, only valid together with `cert_key`.
    pub cert: Option<PathBuf>,
    /// PEM client private key, only valid together with `cert`.
    pub cert_key: Option<PathBuf>,
}

impl TlsPolicy {
    fn identity_paths(&self) -> Result<Option<(&Path, &Path)>, ConnectionError> {
        match (&self.cert, &self.cert_key) {
            (Some(cert), Some(key)) => Ok(Some((cert, key))),
            (None, None) => Ok(None),
            _ => Err(ConnectionError::IncompleteIdentity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Ping interval. `Duration::ZERO` keeps the transport default.
    pub interval: Duration,
}

/// Connection-level policy shared by every connection produced from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    tls: Option<TlsPolicy>,
    authority: Option<String>,
    keepalive: Option<Keepalive>,
    max_receive_message_size: Option<usize>,
    headers: Headers,
}

/// A configuration function touching exactly one concern of a [`ConnectionConfig`].
pub struct ConnOption(Box<dyn FnOnce(&mut ConnectionConfig) + Send>);

impl ConnOption {
    fn new(apply: impl FnOnce(&mut ConnectionConfig) + Send + 'static) -> Self {
        Self(Box::new(apply))
    }
}

/// Enables TLS with the given policy.
pub fn with_tls(policy: TlsPolicy) -> ConnOption {
    ConnOption::new(move |config| config.tls = Some(policy))
}

/// Overrides the `:authority` pseudo-header. An empty string leaves it unset.
pub fn with_authority(authority: impl Into<String>) -> ConnOption {
    let authority = authority.into();
    ConnOption::new(move |config| {
        config.authority = (!authority.is_empty()).then_some(authority);
    })
}

/// Sends keepalive pings even without active calls when `enabled`.
pub fn with_keepalive(enabled: bool, interval: Duration) -> ConnOption {
    ConnOption::new(move |config| {
        config.keepalive = enabled.then_some(Keepalive { interval });
    })
}

/// Limits decoded response messages to `bytes`. Zero keeps the transport default.
pub fn with_max_receive_message_size(bytes: usize) -> ConnOption {
    ConnOption::new(move |config| {
        config.max_receive_message_size = (bytes > 0).then_some(bytes);
    })
}

/// Attaches extra metadata to every call.
pub fn with_headers(headers: Headers) -> ConnOption {
    ConnOption::new(move |config| config.headers = headers)
}

impl ConnectionConfig {
    /// Applies every option to the default configuration.
    pub fn new(options: impl IntoIterator<Item = ConnOption>) -> Self {
        let mut config = Self::default();
        for ConnOption(apply) in options {
            apply(&mut config);
        }
        config
    }

    pub fn tls(&self) -> Option<&TlsPolicy> {
        self.tls.as_ref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn keepalive(&self) -> Option<Keepalive> {
        self.keepalive
    }

    pub fn max_receive_message_size(&self) -> Option<usize> {
        self.max_receive_message_size
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn factory(self) -> ConnectionFactory {
        ConnectionFactory {
            config: Arc::new(self),
        }
    }
}

/// Produces [`Connection`]s to arbitrary targets under one immutable policy.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    config: Arc<ConnectionConfig>,
}

/// A channel plus the per-call policy that travels with it.
#[derive(Debug, Clone)]
pub struct Connection {
    channel: Channel,
    headers: MetadataMap,
    max_receive_message_size: Option<usize>,
    target: String,
}

impl Connection {
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Extra metadata to attach to every call made on this connection.
    pub fn headers(&self) -> &MetadataMap {
        &self.headers
    }

    pub fn max_receive_message_size(&self) -> Option<usize> {
        self.max_receive_message_size
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

struct Prepared {
    endpoint: Endpoint,
    insecure: Option<InsecureConnector>,
    headers: MetadataMap,
}

impl ConnectionFactory {
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Builds the transport endpoint for `target` (`host:port`, with or without a scheme).
    ///
    /// The scheme is chosen by the policy: `https` when TLS is verified, `http` otherwise.
    /// Insecure TLS runs over its own connector, so its endpoint carries no TLS settings.
    pub fn endpoint(&self, target: &str) -> Result<Endpoint, ConnectionError> {
        let uri = self.target_uri(target);
        let mut endpoint =
            Endpoint::from_shared(uri).map_err(|source| ConnectionError::InvalidTarget {
                target: target.to_string(),
                source,
            })?;

        if let Some(authority) = &self.config.authority {
            let origin = Uri::from_str(&format!("{}://{authority}", self.scheme())).map_err(
                |source| ConnectionError::InvalidAuthority {
                    authority: authority.clone(),
                    source,
                },
            )?;
            endpoint = endpoint.origin(origin);
        }

        if let Some(keepalive) = self.config.keepalive {
            endpoint = endpoint.keep_alive_while_idle(true);
            if !keepalive.interval.is_zero() {
                endpoint = endpoint.http2_keep_alive_interval(keepalive.interval);
            }
        }

        if let Some(tls) = &self.config.tls
            && !tls.insecure
        {
            endpoint = endpoint
                .tls_config(self.tls_config(tls)?)
                .map_err(ConnectionError::Tls)?;
        }

        Ok(endpoint)
    }

    /// Establishes the connection eagerly.
    pub async fn connect(&self, target: &str) -> Result<Connection, ConnectionError> {
        let prepared = self.prepare(target)?;

        let channel = match prepared.insecure {
            Some(connector) => prepared.endpoint.connect_with_connector(connector).await,
            None => prepared.endpoint.connect().await,
        }
        .map_err(|source| ConnectionError::ConnectFailed {
            target: target.to_string(),
            source,
        })?;

        Ok(self.connection(target, channel, prepared.headers))
    }

    /// Returns a connection that dials on first use. Transport failures then surface from
    /// the first call instead of from here.
    pub fn connect_lazy(&self, target: &str) -> Result<Connection, ConnectionError> {
        let prepared = self.prepare(target)?;

        let channel = match prepared.insecure {
            Some(connector) => prepared.endpoint.connect_with_connector_lazy(connector),
            None => prepared.endpoint.connect_lazy(),
        };

        Ok(self.connection(target, channel, prepared.headers))
    }

    fn connection(&self, target: &str, channel: Channel, headers: MetadataMap) -> Connection {
        Connection {
            channel,
            headers,
            max_receive_message_size: self.config.max_receive_message_size,
            target: target.to_string(),
        }
    }

    fn prepare(&self, target: &str) -> Result<Prepared, ConnectionError> {
        let endpoint = self.endpoint(target)?;
        let headers = self.metadata()?;

        let insecure = match &self.config.tls {
            Some(tls) if tls.insecure => {
                let identity = match tls.identity_paths()? {
                    Some((cert, key)) => Some(insecure::load_identity(cert, key)?),
                    None => None,
                };
                Some(InsecureConnector::new(identity)?)
            }
            _ => None,
        };

        Ok(Prepared {
            endpoint,
            insecure,
            headers,
        })
    }

    fn scheme(&self) -> &'static str {
        match &self.config.tls {
            Some(tls) if !tls.insecure => "https",
            _ => "http",
        }
    }

    fn target_uri(&self, target: &str) -> String {
        let authority = target
            .split_once("://")
            .map_or(target, |(_, authority)| authority);
        format!("{}://{authority}", self.scheme())
    }

    fn tls_config(&self, tls: &TlsPolicy) -> Result<ClientTlsConfig, ConnectionError> {
        let mut config = match &tls.ca_cert {
            Some(path) => ClientTlsConfig::new().ca_certificate(Certificate::from_pem(read(path)?)),
            None => ClientTlsConfig::new().with_native_roots(),
        };

        if let Some((cert, key)) = tls.identity_paths()? {
            config = config.identity(Identity::from_pem(read(cert)?, read(key)?));
        }

        if let Some(authority) = &self.config.authority {
            let host = authority
                .rsplit_once(':')
                .map_or(authority.as_str(), |(host, _)| host);
            config = config.domain_name(host);
        }

        Ok(config)
    }

    fn metadata(&self) -> Result<MetadataMap, ConnectionError> {
        let mut metadata = MetadataMap::new();

        for (key, values) in &self.config.headers {
            let name = AsciiMetadataKey::from_str(key).map_err(|source| {
                ConnectionError::InvalidMetadataKey {
                    key: key.clone(),
                    source,
                }
            })?;

            for value in values {
                let value = AsciiMetadataValue::from_str(value).map_err(|source| {
                    ConnectionError::InvalidMetadataValue {
                        key: key.clone(),
                        source,
                    }
                })?;
                metadata.append(name.clone(), value);
            }
        }

        Ok(metadata)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ConnectionError> {
    std::fs::read(path).map_err(|source| ConnectionError::ReadCertificate {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Headers {
        Headers::from([
            ("x-tenant".to_string(), vec!["a".to_string(), "b".to_string()]),
            ("authorization".to_string(), vec!["Bearer t0k3n".to_string()]),
        ])
    }

    fn options() -> Vec<ConnOption> {
        vec![
            with_tls(TlsPolicy {
                insecure: true,
                ..TlsPolicy::default()
            }),
            with_authority("api.internal"),
            with_keepalive(true, Duration::from_secs(30)),
            with_max_receive_message_size(1024),
            with_headers(headers()),
        ]
    }

    #[test]
    fn option_order_does_not_matter() {
        let forward = ConnectionConfig::new(options());
        let mut reversed = options();
        reversed.reverse();
        let reversed = ConnectionConfig::new(reversed);

        assert_eq!(forward, reversed);
        assert_eq!(forward.authority(), Some("api.internal"));
        assert_eq!(forward.max_receive_message_size(), Some(1024));
    }

    #[test]
    fn zero_and_empty_values_keep_defaults() {
        let config = ConnectionConfig::new([
            with_authority(""),
            with_keepalive(false, Duration::from_secs(10)),
            with_max_receive_message_size(0),
        ]);

        assert_eq!(config, ConnectionConfig::default());
    }

    #[tokio::test]
    async fn plaintext_factory_without_metadata() {
        let factory = ConnectionConfig::new([]).factory();

        let endpoint = factory.endpoint("host:1234").unwrap();
        assert_eq!(endpoint.uri().scheme_str(), Some("http"));
        assert_eq!(endpoint.uri().authority().unwrap().as_str(), "host:1234");

        let connection = factory.connect_lazy("host:1234").unwrap();
        assert!(connection.headers().is_empty());
        assert_eq!(connection.max_receive_message_size(), None);
        assert_eq!(connection.target(), "host:1234");
    }

    #[test]
    fn verified_tls_switches_to_https() {
        let factory = ConnectionConfig::new([with_tls(TlsPolicy::default())]).factory();

        let endpoint = factory.endpoint("http://host:443").unwrap();
        assert_eq!(endpoint.uri().scheme_str(), Some("https"));
    }

    #[tokio::test]
    async fn repeated_headers_become_repeated_metadata() {
        let factory = ConnectionConfig::new([with_headers(headers())]).factory();

        let connection = factory.connect_lazy("localhost:50051").unwrap();
        let tenants: Vec<_> = connection
            .headers()
            .get_all("x-tenant")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();

        assert_eq!(tenants, vec!["a", "b"]);
        assert_eq!(
            connection.headers().get("authorization").unwrap(),
            "Bearer t0k3n"
        );
    }

    #[tokio::test]
    async fn certificate_without_key_fails_on_connect() {
        let factory = ConnectionConfig::new([with_tls(TlsPolicy {
            insecure: true,
            cert: Some(PathBuf::from("client.pem")),
            ..TlsPolicy::default()
        })])
        .factory();

        assert!(matches!(
            factory.connect_lazy("localhost:50051"),
            Err(ConnectionError::IncompleteIdentity)
        ));
    }

    #[test]
    fn invalid_header_names_fail_on_connect() {
        let factory = ConnectionConfig::new([with_headers(Headers::from([(
            "bad header".to_string(),
            vec!["v".to_string()],
        )]))])
        .factory();

        assert!(matches!(
            factory.connect_lazy("localhost:50051"),
            Err(ConnectionError::InvalidMetadataKey { .. })
        ));
    }
}
