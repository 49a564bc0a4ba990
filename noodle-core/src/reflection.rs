//! # Server Reflection
//!
//! Client side of the gRPC Server Reflection Protocol, in both of its published versions.
//!
//! `grpc.reflection.v1` and `grpc.reflection.v1alpha` share the exact same message schema and
//! differ only in the service path, so a single client speaks both: the
//! [`ProtocolVersion`] chosen per exchange selects the path.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
pub mod client;

use http::uri::PathAndQuery;
use prost_types::FileDescriptorProto;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

pub use client::{ReflectionClient, ReflectionResolveError};

/// A concrete version of the reflection protocol, as spoken on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1,
    V1Alpha,
}

impl ProtocolVersion {
    pub fn path(self) -> PathAndQuery {
        match self {
            ProtocolVersion::V1 => PathAndQuery::from_static(
                "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
            ),
            ProtocolVersion::V1Alpha => PathAndQuery::from_static(
                "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
            ),
        }
    }

    /// The version tried when the other one is not implemented by the server.
    pub fn alternate(self) -> Self {
        match self {
            ProtocolVersion::V1 => ProtocolVersion::V1Alpha,
            ProtocolVersion::V1Alpha => ProtocolVersion::V1,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("v1"),
            ProtocolVersion::V1Alpha => f.write_str("v1alpha"),
        }
    }
}

/// User-facing version selector.
///
/// `Auto` starts with `v1` and falls back to `v1alpha` once, if and only if the server answers
/// the very first request with `Unimplemented`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReflectVersion {
    #[default]
    V1Alpha,
    V1,
    Auto,
}

impl ReflectVersion {
    /// The version the first exchange is attempted with.
    pub fn primary(self) -> ProtocolVersion {
        match self {
            ReflectVersion::V1Alpha => ProtocolVersion::V1Alpha,
            ReflectVersion::V1 | ReflectVersion::Auto => ProtocolVersion::V1,
        }
    }

    pub fn negotiates(self) -> bool {
        self == ReflectVersion::Auto
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown reflection version '{0}', expected one of: v1alpha, v1, auto")]
pub struct UnknownReflectVersion(String);

impl FromStr for ReflectVersion {
    type Err = UnknownReflectVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1alpha" => Ok(ReflectVersion::V1Alpha),
            "v1" => Ok(ReflectVersion::V1),
            "auto" => Ok(ReflectVersion::Auto),
            _ => Err(UnknownReflectVersion(s.to_string())),
        }
    }
}

impl fmt::Display for ReflectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReflectVersion::V1Alpha => f.write_str("v1alpha"),
            ReflectVersion::V1 => f.write_str("v1"),
            ReflectVersion::Auto => f.write_str("auto"),
        }
    }
}

/// Descriptor files gathered over one resolution, each name kept once, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct DescriptorCollection {
    files: Vec<FileDescriptorProto>,
    names: HashSet<String>,
}

impl DescriptorCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Adds `file` unless a file with the same name was already collected.
    pub fn insert(&mut self, file: FileDescriptorProto) -> bool {
        let name = file.name().to_string();
        if !self.names.insert(name) {
            return false;
        }
        self.files.push(file);
        true
    }

    /// Whether a collected file declares the fully qualified service `full_name`.
    pub fn declares_service(&self, full_name: &str) -> bool {
        self.files.iter().any(|file| {
            file.service.iter().any(|service| {
                let name = service.name();
                match file.package() {
                    "" => name == full_name,
                    package => full_name
                        .strip_prefix(package)
                        .and_then(|rest| rest.strip_prefix('.'))
                        .is_some_and(|rest| rest == name),
                }
            })
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_files(self) -> Vec<FileDescriptorProto> {
        self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::ServiceDescriptorProto;

    #[test]
    fn parses_version_selectors() {
        assert_eq!("v1".parse::<ReflectVersion>().unwrap(), ReflectVersion::V1);
        assert_eq!("V1Alpha".parse::<ReflectVersion>().unwrap(), ReflectVersion::V1Alpha);
        assert_eq!("auto".parse::<ReflectVersion>().unwrap(), ReflectVersion::Auto);
        assert!("v2".parse::<ReflectVersion>().is_err());
        assert_eq!(ReflectVersion::default(), ReflectVersion::V1Alpha);
    }

    #[test]
    fn auto_starts_with_v1() {
        assert_eq!(ReflectVersion::Auto.primary(), ProtocolVersion::V1);
        assert_eq!(ProtocolVersion::V1.alternate(), ProtocolVersion::V1Alpha);
        assert_eq!(
            ProtocolVersion::V1Alpha.path().as_str(),
            "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo"
        );
    }

    #[test]
    fn collection_keeps_first_file_per_name() {
        let mut collection = DescriptorCollection::new();
        let file = FileDescriptorProto {
            name: Some("files.proto".into()),
            package: Some("files".into()),
            service: vec![ServiceDescriptorProto {
                name: Some("FileService".into()),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert!(collection.insert(file.clone()));
        assert!(!collection.insert(file));
        assert_eq!(collection.len(), 1);
        assert!(collection.declares_service("files.FileService"));
        assert!(!collection.declares_service("files.File"));
        assert!(!collection.declares_service("other.FileService"));
    }
}
