//! # Dynamic gRPC Transport
//!
//! Building blocks for calling methods known only through their descriptors.
//!
//! Unlike standard `tonic` clients, which are strongly typed (e.g. `HelloRequest`), the
//! components here exchange `DynamicMessage`s. The [`format`] module turns JSON or protobuf
//! text input into such messages and renders responses back.
pub mod client;
pub mod codec;
pub mod format;
pub mod health;
