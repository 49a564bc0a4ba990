//! The resolved set of services a target exposes, plus the descriptor files backing them.
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorProto;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodMeta {
    pub name: String,
    /// Fully qualified input message name, without the leading dot.
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl From<&MethodDescriptor> for MethodMeta {
    fn from(method: &MethodDescriptor) -> Self {
        Self {
            name: method.name().to_string(),
            input_type: method.input().full_name().to_string(),
            output_type: method.output().full_name().to_string(),
            client_streaming: method.is_client_streaming(),
            server_streaming: method.is_server_streaming(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceMeta {
    descriptor: ServiceDescriptor,
    methods: Vec<MethodMeta>,
}

impl ServiceMeta {
    pub fn name(&self) -> &str {
        self.descriptor.full_name()
    }

    /// Methods in declaration order.
    pub fn methods(&self) -> &[MethodMeta] {
        &self.methods
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }
}

impl From<ServiceDescriptor> for ServiceMeta {
    fn from(descriptor: ServiceDescriptor) -> Self {
        let methods = descriptor.methods().map(|m| MethodMeta::from(&m)).collect();
        Self {
            descriptor,
            methods,
        }
    }
}

/// Services in resolution order and every file needed to decode the types they reference.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: Vec<ServiceMeta>,
    files: Vec<FileDescriptorProto>,
}

impl ServiceCatalog {
    pub fn new(services: Vec<ServiceMeta>, files: Vec<FileDescriptorProto>) -> Self {
        Self { services, files }
    }

    pub fn services(&self) -> &[ServiceMeta] {
        &self.services
    }

    /// Descriptor files, each name present once, transitive imports included.
    pub fn files(&self) -> &[FileDescriptorProto] {
        &self.files
    }

    pub fn into_files(self) -> Vec<FileDescriptorProto> {
        self.files
    }

    pub fn service(&self, name: &str) -> Option<&ServiceMeta> {
        self.services.iter().find(|service| service.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// `Service/Method` strings for interactive completion, in catalog order.
    pub fn completion_candidates(&self) -> Vec<String> {
        self.services
            .iter()
            .flat_map(|service| {
                service
                    .methods
                    .iter()
                    .map(move |method| format!("{}/{}", service.name(), method.name))
            })
            .collect()
    }
}
