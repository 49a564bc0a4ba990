//! # Noodle Core
//!
//! `noodle-core` is the library behind the Noodle CLI. It bootstraps a session against a
//! gRPC server: it resolves the service catalog, builds connections under a configurable
//! policy and captures per-call diagnostics for verbose reporting.
//!
//! ## Key Components
//!
//! * **[`connection::ConnectionConfig`]:** Connection policy (TLS, headers, keepalive, message
//!   limits, authority) built from independent option functions. It produces a reusable
//!   [`connection::ConnectionFactory`].
//! * **[`resolver::CatalogResolver`]:** Resolves the service catalog either from local `.proto`
//!   files or from the server reflection protocol (`v1`, `v1alpha`, or negotiated).
//! * **[`registry::DescriptorRegistry`]:** Session-owned registry of file descriptors used
//!   by the payload transcoder.
//! * **[`stats::StatsContext`]:** Per-call statistics (method, metadata, sizes, duration).
//! * **[`report::VerboseReporter`]:** Renders a stats snapshot as a diagnostic block.
//! * **[`session::Session`]:** Orchestrates all of the above.
//!
//! ## Transcoding
//!
//! The [`grpc`] module holds the dynamic client used once a method descriptor is resolved.
//! It turns JSON or protobuf text input into `DynamicMessage`s and back.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod catalog;
pub mod connection;
pub mod endpoint;
pub mod grpc;
pub mod reflection;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod session;
pub mod stats;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tokio_util::sync::CancellationToken;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Maps an error onto the gRPC status code reported to the user.
pub trait StatusCode {
    fn code(&self) -> tonic::Code;
}

impl StatusCode for tonic::Status {
    fn code(&self) -> tonic::Code {
        tonic::Status::code(self)
    }
}
