use colored::*;
use noodle_core::{
    catalog::ServiceCatalog,
    connection::ConnectionError,
    grpc::{client::GrpcRequestError, format::FormatError, health::ServingStatus},
    prost_reflect::{
        Cardinality, EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor,
        ServiceDescriptor,
    },
    registry::RegistrationError,
    session::SessionError,
    tonic::Status,
};
use std::collections::HashSet;
use std::fmt::Display;

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

/// The service listing printed when no method is selected.
pub struct ServiceList<'a>(pub &'a ServiceCatalog);

pub struct GenericError<T: Display>(pub &'static str, pub T);

/// Health of one endpoint.
pub struct Health<'a>(pub &'a str, pub ServingStatus);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.0)
    }
}

impl From<Status> for FormattedString {
    fn from(status: Status) -> Self {
        FormattedString(format!(
            "{} code={:?} message={:?}",
            "gRPC Failed:".red().bold(),
            status.code(),
            status.message()
        ))
    }
}

impl From<SessionError> for FormattedString {
    fn from(err: SessionError) -> Self {
        let title = match err {
            SessionError::Connection(_) => "Connection Error:",
            SessionError::Resolve(_) => "Failed to resolve services:",
        };
        FormattedString(format!("{}\n\n'{}'", title.red().bold(), err))
    }
}

impl From<ConnectionError> for FormattedString {
    fn from(err: ConnectionError) -> Self {
        FormattedString(format!("{}\n\n'{}'", "Connection Error:".red().bold(), err))
    }
}

impl From<GrpcRequestError> for FormattedString {
    fn from(err: GrpcRequestError) -> Self {
        FormattedString(format!("{}\n\n'{}'", "Call Failed:".red().bold(), err))
    }
}

impl From<FormatError> for FormattedString {
    fn from(err: FormatError) -> Self {
        FormattedString(format!("{}\n\n'{}'", "Invalid message:".red().bold(), err))
    }
}

impl From<&RegistrationError> for FormattedString {
    fn from(err: &RegistrationError) -> Self {
        FormattedString(format!(
            "{}\n\n'{}'",
            "Some descriptor files could not be registered:".yellow().bold(),
            err
        ))
    }
}

impl From<std::io::Error> for FormattedString {
    fn from(err: std::io::Error) -> Self {
        FormattedString(format!(
            "{}\n\n'{}'",
            "Failed to read input:".red().bold(),
            err
        ))
    }
}

impl<T: Display> From<GenericError<T>> for FormattedString {
    fn from(GenericError(msg, err): GenericError<T>) -> Self {
        FormattedString(format!("{}:\n\n'{}'", msg.red().bold(), err))
    }
}

impl From<ServiceList<'_>> for FormattedString {
    fn from(ServiceList(catalog): ServiceList<'_>) -> Self {
        if catalog.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::new();
        out.push_str("Available Services:\n");
        for service in catalog.services() {
            out.push_str(&format!("  - {}\n", service.name().green()));
            for method in service.methods() {
                out.push_str(&format!("      {}\n", method.name));
            }
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<Health<'_>> for FormattedString {
    fn from(Health(target, status): Health<'_>) -> Self {
        let status = match status {
            ServingStatus::Serving => status.as_str_name().green(),
            _ => status.as_str_name().red(),
        };
        FormattedString(format!("{}: {}", target.bold(), status))
    }
}

impl From<ServiceDescriptor> for FormattedString {
    fn from(service: ServiceDescriptor) -> Self {
        let methods: Vec<String> = service
            .methods()
            .map(|method| format!("  {}\n", FormattedString::from(method).0))
            .collect();

        FormattedString(format!(
            "{} {} {{\n{}}}",
            "service".cyan(),
            service.name().green(),
            methods.join("\n")
        ))
    }
}

impl From<MethodDescriptor> for FormattedString {
    fn from(method: MethodDescriptor) -> Self {
        let streamed = |streaming: bool| {
            if streaming {
                format!("{} ", "stream".cyan())
            } else {
                String::new()
            }
        };

        FormattedString(format!(
            "{} {}({}{}) {} ({}{});",
            "rpc".cyan(),
            method.name().green(),
            streamed(method.is_client_streaming()),
            method.input().full_name().yellow(),
            "returns".cyan(),
            streamed(method.is_server_streaming()),
            method.output().full_name().yellow()
        ))
    }
}

/// The declared type of a field, `map<K, V>` for map fields.
fn type_name(field: &FieldDescriptor) -> String {
    match field.kind() {
        Kind::Message(entry) if field.is_map() => format!(
            "map<{}, {}>",
            type_name(&entry.map_entry_key_field()),
            type_name(&entry.map_entry_value_field())
        ),
        Kind::Message(message) => message.full_name().yellow().to_string(),
        Kind::Enum(enum_desc) => enum_desc.full_name().yellow().to_string(),
        scalar => format!("{scalar:?}").to_lowercase().yellow().to_string(),
    }
}

fn field_line(field: &FieldDescriptor, indent: &str) -> String {
    let label = if field.is_list() {
        format!("{} ", "repeated".cyan())
    } else if field.cardinality() == Cardinality::Required {
        format!("{} ", "required".cyan())
    } else if field.containing_oneof().is_some_and(|o| o.is_synthetic()) {
        format!("{} ", "optional".cyan())
    } else {
        String::new()
    };

    format!(
        "{indent}{label}{} {} = {};\n",
        type_name(field),
        field.name(),
        field.number()
    )
}

impl From<MessageDescriptor> for FormattedString {
    fn from(message: MessageDescriptor) -> Self {
        let mut out = format!("{} {} {{\n", "message".cyan(), message.name().green());
        let mut printed_oneofs = HashSet::new();

        for field in message.fields() {
            match field.containing_oneof().filter(|o| !o.is_synthetic()) {
                // A oneof is printed whole, where its first field is declared.
                Some(oneof) => {
                    if !printed_oneofs.insert(oneof.name().to_string()) {
                        continue;
                    }
                    out.push_str(&format!("  {} {} {{\n", "oneof".cyan(), oneof.name()));
                    for member in oneof.fields() {
                        out.push_str(&field_line(&member, "    "));
                    }
                    out.push_str("  }\n");
                }
                None => out.push_str(&field_line(&field, "  ")),
            }
        }

        out.push('}');
        FormattedString(out)
    }
}

impl From<EnumDescriptor> for FormattedString {
    fn from(enum_desc: EnumDescriptor) -> Self {
        let values: String = enum_desc
            .values()
            .map(|value| {
                format!(
                    "  {} = {};\n",
                    value.name(),
                    value.number().to_string().purple()
                )
            })
            .collect();

        FormattedString(format!(
            "{} {} {{\n{values}}}",
            "enum".cyan(),
            enum_desc.name().green()
        ))
    }
}

/// The enum a field refers to, looking through map values.
fn referenced_enum(field: &FieldDescriptor) -> Option<EnumDescriptor> {
    match field.kind() {
        Kind::Enum(enum_desc) => Some(enum_desc),
        Kind::Message(entry) if field.is_map() => referenced_enum(&entry.map_entry_value_field()),
        _ => None,
    }
}

/// Every message and enum `method` exchanges, its own types first, deduplicated.
pub fn method_types(method: &MethodDescriptor) -> Vec<FormattedString> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for message in [method.input(), method.output()] {
        if !seen.insert(message.full_name().to_string()) {
            continue;
        }

        let enums: Vec<EnumDescriptor> = message
            .fields()
            .filter_map(|field| referenced_enum(&field))
            .collect();

        out.push(FormattedString::from(message));
        for e in enums {
            if seen.insert(e.full_name().to_string()) {
                out.push(FormattedString::from(e));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use noodle_core::catalog::ServiceMeta;
    use noodle_core::prost_reflect::DescriptorPool;
    use prost_types::{
        DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
        FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
        OneofDescriptorProto, ServiceDescriptorProto,
        field_descriptor_proto::{Label, Type},
    };

    fn field(name: &str, r#type: Type, type_name: Option<&str>) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(1),
            r#type: Some(r#type as i32),
            type_name: type_name.map(Into::into),
            json_name: Some(name.into()),
            ..Default::default()
        }
    }

    fn enum_value(name: &str, number: i32) -> EnumValueDescriptorProto {
        EnumValueDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            ..Default::default()
        }
    }

    fn numbered(number: i32, field: FieldDescriptorProto) -> FieldDescriptorProto {
        FieldDescriptorProto {
            number: Some(number),
            ..field
        }
    }

    fn in_oneof(index: i32, field: FieldDescriptorProto) -> FieldDescriptorProto {
        FieldDescriptorProto {
            oneof_index: Some(index),
            ..field
        }
    }

    /// `map<string, Kind> kinds`, a `cursor` oneof, a proto3 optional and a repeated field.
    fn listing() -> DescriptorProto {
        let kinds_entry = DescriptorProto {
            name: Some("KindsEntry".into()),
            field: vec![
                field("key", Type::String, None),
                numbered(2, field("value", Type::Enum, Some(".files.Kind"))),
            ],
            options: Some(MessageOptions {
                map_entry: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        DescriptorProto {
            name: Some("Listing".into()),
            field: vec![
                FieldDescriptorProto {
                    label: Some(Label::Repeated as i32),
                    ..field("kinds", Type::Message, Some(".files.Listing.KindsEntry"))
                },
                in_oneof(0, numbered(2, field("token", Type::String, None))),
                in_oneof(0, numbered(3, field("offset", Type::Int64, None))),
                FieldDescriptorProto {
                    proto3_optional: Some(true),
                    ..in_oneof(1, numbered(4, field("note", Type::String, None)))
                },
                FieldDescriptorProto {
                    label: Some(Label::Repeated as i32),
                    ..numbered(5, field("names", Type::String, None))
                },
            ],
            nested_type: vec![kinds_entry],
            oneof_decl: vec![
                OneofDescriptorProto {
                    name: Some("cursor".into()),
                    ..Default::default()
                },
                OneofDescriptorProto {
                    name: Some("_note".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn pool() -> DescriptorPool {
        let file = FileDescriptorProto {
            name: Some("files.proto".into()),
            package: Some("files".into()),
            syntax: Some("proto3".into()),
            message_type: vec![
                DescriptorProto {
                    name: Some("StatRequest".into()),
                    field: vec![field("path", Type::String, None)],
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("FileEntry".into()),
                    field: vec![field("kind", Type::Enum, Some(".files.Kind"))],
                    ..Default::default()
                },
                listing(),
            ],
            enum_type: vec![EnumDescriptorProto {
                name: Some("Kind".into()),
                value: vec![enum_value("FILE", 0), enum_value("DIR", 1)],
                ..Default::default()
            }],
            service: vec![ServiceDescriptorProto {
                name: Some("StatService".into()),
                method: vec![
                    MethodDescriptorProto {
                        name: Some("Stat".into()),
                        input_type: Some(".files.StatRequest".into()),
                        output_type: Some(".files.FileEntry".into()),
                        ..Default::default()
                    },
                    MethodDescriptorProto {
                        name: Some("List".into()),
                        input_type: Some(".files.StatRequest".into()),
                        output_type: Some(".files.Listing".into()),
                        server_streaming: Some(true),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] }).unwrap()
    }

    fn plain<T>(value: T) -> String
    where
        FormattedString: From<T>,
    {
        colored::control::set_override(false);
        FormattedString::from(value).0
    }

    #[test]
    fn lists_services_with_their_methods() {
        let service = pool().get_service_by_name("files.StatService").unwrap();
        let catalog = ServiceCatalog::new(vec![ServiceMeta::from(service)], Vec::new());

        assert_eq!(
            plain(ServiceList(&catalog)),
            "Available Services:\n  - files.StatService\n      Stat\n      List"
        );
        assert_eq!(
            plain(ServiceList(&ServiceCatalog::default())),
            "No services found."
        );
    }

    #[test]
    fn describes_a_method_and_its_types() {
        colored::control::set_override(false);
        let method = pool()
            .get_service_by_name("files.StatService")
            .and_then(|s| s.methods().next())
            .unwrap();

        assert_eq!(
            plain(method.clone()),
            "rpc Stat(files.StatRequest) returns (files.FileEntry);"
        );

        let types: Vec<String> = method_types(&method).into_iter().map(|f| f.0).collect();
        assert_eq!(types.len(), 3);
        assert!(types[0].starts_with("message StatRequest {"));
        assert!(types[1].contains("files.Kind kind = 1;"));
        assert_eq!(types[2], "enum Kind {\n  FILE = 0;\n  DIR = 1;\n}");
    }

    #[test]
    fn renders_maps_and_oneofs_as_declared() {
        let method = pool()
            .get_service_by_name("files.StatService")
            .and_then(|s| s.methods().find(|m| m.name() == "List"))
            .unwrap();

        assert_eq!(
            plain(method.clone()),
            "rpc List(files.StatRequest) returns (stream files.Listing);"
        );
        assert_eq!(
            plain(method.output()),
            "message Listing {\n  \
             map<string, files.Kind> kinds = 1;\n  \
             oneof cursor {\n    string token = 2;\n    int64 offset = 3;\n  }\n  \
             optional string note = 4;\n  \
             repeated string names = 5;\n}"
        );

        // The enum behind the map value is listed after the output message.
        let types: Vec<String> = method_types(&method).into_iter().map(|f| f.0).collect();
        assert_eq!(types.len(), 3);
        assert!(types[1].starts_with("message Listing {"));
        assert!(types[2].starts_with("enum Kind {"));
    }
}
