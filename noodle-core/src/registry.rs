//! # Descriptor Registry
//!
//! The session-owned store of file descriptors the transcoder resolves message types from.
//!
//! Registration is additive and best-effort: a file whose name is already registered is
//! skipped, files are added in dependency order regardless of input order, and files that
//! fail validation are reported together while every valid file is still registered.
use parking_lot::RwLock;
use prost_reflect::{DescriptorError, DescriptorPool, MethodDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorProto;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Every file that could not be registered, with the reason.
#[derive(Debug)]
pub struct RegistrationError {
    pub failures: Vec<(String, DescriptorError)>,
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to register {} file(s)", self.failures.len())?;
        for (name, error) in &self.failures {
            write!(f, "\n  {name}: {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RegistrationError {}

/// A cloneable handle to one shared pool. Clones observe each other's registrations.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    pool: Arc<RwLock<DescriptorPool>>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every file not yet present and returns how many were added.
    ///
    /// Files failing validation (e.g. an import that is neither registered nor part of the
    /// batch) are listed in the returned error; the remaining files are registered anyway.
    pub fn register(
        &self,
        files: impl IntoIterator<Item = FileDescriptorProto>,
    ) -> Result<usize, RegistrationError> {
        let mut pool = self.pool.write();

        let mut names = HashSet::new();
        let mut pending = Vec::new();
        for file in files {
            if let Some(existing) = pool.get_file_by_name(file.name()) {
                if existing.file_descriptor_proto() != &file {
                    tracing::debug!(
                        file = file.name(),
                        "Skipping descriptor, a different file with this name is already registered"
                    );
                }
                continue;
            }
            if names.insert(file.name().to_string()) {
                pending.push(file);
            }
        }

        let mut registered = 0;
        let mut failures = Vec::new();

        // Add whatever has all its imports available, until a pass makes no progress.
        while !pending.is_empty() {
            let before = pending.len();
            let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|file| {
                file.dependency
                    .iter()
                    .all(|dep| pool.get_file_by_name(dep).is_some())
            });
            pending = blocked;

            for file in ready {
                let name = file.name().to_string();
                match pool.add_file_descriptor_proto(file) {
                    Ok(()) => registered += 1,
                    Err(error) => failures.push((name, error)),
                }
            }

            if pending.len() == before {
                break;
            }
        }

        // Whatever is left has an unresolvable import; let the pool describe why.
        for file in pending {
            let name = file.name().to_string();
            match pool.add_file_descriptor_proto(file) {
                Ok(()) => registered += 1,
                Err(error) => failures.push((name, error)),
            }
        }

        if failures.is_empty() {
            Ok(registered)
        } else {
            Err(RegistrationError { failures })
        }
    }

    /// A snapshot of the pool. Later registrations are not reflected in it.
    pub fn pool(&self) -> DescriptorPool {
        self.pool.read().clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pool.read().get_file_by_name(name).is_some()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.pool
            .read()
            .files()
            .map(|file| file.name().to_string())
            .collect()
    }

    pub fn service(&self, name: &str) -> Option<ServiceDescriptor> {
        self.pool.read().get_service_by_name(name)
    }

    pub fn method(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
        self.service(service)?
            .methods()
            .find(|candidate| candidate.name() == method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{DescriptorProto, MethodDescriptorProto, ServiceDescriptorProto};

    fn message_file(name: &str, message: &str, deps: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: Some("geo".to_string()),
            dependency: deps.iter().map(|d| d.to_string()).collect(),
            message_type: vec![DescriptorProto {
                name: Some(message.to_string()),
                ..Default::default()
            }],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
    }

    fn service_file() -> FileDescriptorProto {
        FileDescriptorProto {
            service: vec![ServiceDescriptorProto {
                name: Some("Locator".to_string()),
                method: vec![MethodDescriptorProto {
                    name: Some("Locate".to_string()),
                    input_type: Some(".geo.Point".to_string()),
                    output_type: Some(".geo.Area".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..message_file("geo/area.proto", "Area", &["geo/point.proto"])
        }
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let registry = DescriptorRegistry::new();
        let files = vec![message_file("geo/point.proto", "Point", &[]), service_file()];

        assert_eq!(registry.register(files.clone()).unwrap(), 2);
        let after_first = registry.file_names();

        assert_eq!(registry.register(files).unwrap(), 0);
        assert_eq!(registry.file_names(), after_first);
    }

    #[test]
    fn registers_in_dependency_order() {
        let registry = DescriptorRegistry::new();

        registry
            .register(vec![service_file(), message_file("geo/point.proto", "Point", &[])])
            .unwrap();

        let method = registry.method("geo.Locator", "Locate").unwrap();
        assert_eq!(method.input().full_name(), "geo.Point");
        assert_eq!(method.output().full_name(), "geo.Area");
        assert!(registry.method("geo.Locator", "Missing").is_none());
    }

    #[test]
    fn missing_imports_do_not_block_valid_files() {
        let registry = DescriptorRegistry::new();

        let err = registry
            .register(vec![
                message_file("geo/point.proto", "Point", &[]),
                message_file("geo/route.proto", "Route", &["geo/missing.proto"]),
            ])
            .unwrap_err();

        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].0, "geo/route.proto");
        assert!(registry.contains("geo/point.proto"));
        assert!(!registry.contains("geo/route.proto"));
    }

    #[test]
    fn clones_share_the_same_pool() {
        let registry = DescriptorRegistry::new();
        let shared = registry.clone();

        shared
            .register(vec![message_file("geo/point.proto", "Point", &[])])
            .unwrap();

        assert!(registry.contains("geo/point.proto"));
    }

    #[test]
    fn conflicting_content_keeps_the_first_file() {
        let registry = DescriptorRegistry::new();
        registry
            .register(vec![message_file("geo/point.proto", "Point", &[])])
            .unwrap();

        let added = registry
            .register(vec![message_file("geo/point.proto", "Coordinate", &[])])
            .unwrap();

        assert_eq!(added, 0);
        assert!(registry.pool().get_message_by_name("geo.Point").is_some());
        assert!(registry.pool().get_message_by_name("geo.Coordinate").is_none());
    }

    #[test]
    fn concurrent_registrations_add_each_file_once() {
        let registry = DescriptorRegistry::new();
        let files = [
            message_file("geo/point.proto", "Point", &[]),
            service_file(),
            message_file("geo/route.proto", "Route", &["geo/point.proto"]),
        ];

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let mut batch = files.to_vec();
                batch.rotate_left(i % files.len());
                if i % 2 == 1 {
                    batch.reverse();
                }
                std::thread::spawn(move || registry.register(batch).unwrap())
            })
            .collect();

        let added: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(added, files.len());
        let names = registry.file_names();
        for file in &files {
            assert_eq!(names.iter().filter(|n| *n == file.name()).count(), 1);
        }
        assert!(registry.method("geo.Locator", "Locate").is_some());
    }
}
