//! Message input and output formats.
//!
//! JSON follows the canonical protobuf JSON mapping. A JSON array on input stands for a
//! sequence of messages, which is how client-streaming calls are fed.
use prost_reflect::{DynamicMessage, MessageDescriptor, SerializeOptions};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MsgFormat {
    #[default]
    Json,
    /// Protobuf text format.
    Text,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown message format '{0}', expected one of: json, text")]
pub struct UnknownFormat(String);

impl FromStr for MsgFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(MsgFormat::Json),
            "text" => Ok(MsgFormat::Text),
            _ => Err(UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for MsgFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgFormat::Json => f.write_str("json"),
            MsgFormat::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("JSON input does not match the '{message}' schema: {source}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Text input does not match the '{message}' schema: {source}")]
    Text {
        message: String,
        #[source]
        source: prost_reflect::text_format::ParseError,
    },
    #[error("Failed to render message as JSON: {0}")]
    Render(#[source] serde_json::Error),
}

/// Parses `input` into messages of type `desc`. Blank input yields one empty message.
pub fn parse_messages(
    desc: &MessageDescriptor,
    input: &str,
    format: MsgFormat,
) -> Result<Vec<DynamicMessage>, FormatError> {
    if input.trim().is_empty() {
        return Ok(vec![DynamicMessage::new(desc.clone())]);
    }

    match format {
        MsgFormat::Json => {
            let json_error = |source| FormatError::Json {
                message: desc.full_name().to_string(),
                source,
            };

            let value: serde_json::Value = serde_json::from_str(input).map_err(json_error)?;
            let values = match value {
                serde_json::Value::Array(values) => values,
                single => vec![single],
            };

            values
                .into_iter()
                .map(|value| DynamicMessage::deserialize(desc.clone(), value).map_err(json_error))
                .collect()
        }
        MsgFormat::Text => DynamicMessage::parse_text_format(desc.clone(), input)
            .map(|message| vec![message])
            .map_err(|source| FormatError::Text {
                message: desc.full_name().to_string(),
                source,
            }),
    }
}

/// Renders `message`. With `json_names`, JSON output uses the `json_name` of each field
/// (lower camel case) instead of the field name as declared.
pub fn render_message(
    message: &DynamicMessage,
    format: MsgFormat,
    json_names: bool,
) -> Result<String, FormatError> {
    match format {
        MsgFormat::Json => {
            let options = SerializeOptions::new().use_proto_field_name(!json_names);
            let mut out = Vec::new();
            let mut serializer = serde_json::Serializer::pretty(&mut out);
            message
                .serialize_with_options(&mut serializer, &options)
                .map_err(FormatError::Render)?;
            Ok(String::from_utf8_lossy(&out).into_owned())
        }
        MsgFormat::Text => Ok(message.to_text_format()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_reflect::{DescriptorPool, Value};
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto,
        field_descriptor_proto::{Label, Type},
    };

    fn entry_descriptor() -> MessageDescriptor {
        let file = FileDescriptorProto {
            name: Some("entry.proto".into()),
            package: Some("files".into()),
            syntax: Some("proto3".into()),
            message_type: vec![DescriptorProto {
                name: Some("FileEntry".into()),
                field: vec![FieldDescriptorProto {
                    name: Some("file_name".into()),
                    json_name: Some("fileName".into()),
                    number: Some(1),
                    label: Some(Label::Optional as i32),
                    r#type: Some(Type::String as i32),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };

        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(file).unwrap();
        pool.get_message_by_name("files.FileEntry").unwrap()
    }

    #[test]
    fn json_array_is_a_message_sequence() {
        let desc = entry_descriptor();

        let messages = parse_messages(
            &desc,
            r#"[{"file_name": "a.txt"}, {"fileName": "b.txt"}]"#,
            MsgFormat::Json,
        )
        .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[1].get_field_by_name("file_name").unwrap().as_ref(),
            &Value::String("b.txt".into())
        );
    }

    #[test]
    fn blank_input_is_one_default_message() {
        let messages = parse_messages(&entry_descriptor(), "  \n", MsgFormat::Text).unwrap();

        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn text_input_and_output() {
        let desc = entry_descriptor();

        let messages = parse_messages(&desc, r#"file_name: "notes.md""#, MsgFormat::Text).unwrap();

        assert_eq!(
            render_message(&messages[0], MsgFormat::Text, false).unwrap(),
            r#"file_name:"notes.md""#
        );
    }

    #[test]
    fn json_field_naming() {
        let desc = entry_descriptor();
        let message = parse_messages(&desc, r#"{"file_name": "a"}"#, MsgFormat::Json)
            .unwrap()
            .remove(0);

        let proto_names = render_message(&message, MsgFormat::Json, false).unwrap();
        let json_names = render_message(&message, MsgFormat::Json, true).unwrap();

        assert!(proto_names.contains("\"file_name\""));
        assert!(json_names.contains("\"fileName\""));
    }

    #[test]
    fn rejects_fields_outside_the_schema() {
        let err = parse_messages(&entry_descriptor(), r#"{"size": 3}"#, MsgFormat::Json)
            .unwrap_err();

        assert!(matches!(err, FormatError::Json { .. }));
    }
}
