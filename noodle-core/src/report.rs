//! Formats a [`CallStats`] snapshot into the diagnostic block shown in verbose mode.
//!
//! The block is informational only. Nothing downstream inspects it, and it never influences
//! the exit status.
use crate::StatusCode;
use crate::stats::CallStats;
use colored::Colorize;
use std::fmt::Write;
use tonic::metadata::{KeyAndValueRef, MetadataMap};

pub struct VerboseReporter;

impl VerboseReporter {
    /// Renders `stats`, with the status taken from `error` (`0 OK` when there is none).
    pub fn render<E: StatusCode + ?Sized>(stats: &CallStats, error: Option<&E>) -> String {
        let mut out = String::new();

        let code = error.map_or(tonic::Code::Ok, StatusCode::code);
        let name = match code {
            tonic::Code::Ok => "OK".to_string(),
            other => format!("{other:?}"),
        };
        let status = format!("{} {}", code as i32, name);
        let status = if code == tonic::Code::Ok {
            status.green()
        } else {
            status.red()
        };

        let _ = writeln!(out, "{} {}", "Method:".bold(), stats.full_method().green());
        let _ = writeln!(out, "{} {}", "Status:".bold(), status);

        write_metadata(&mut out, "Request Headers:", stats.request_headers());
        if !stats.response_headers().is_empty() {
            write_metadata(&mut out, "Response Headers:", stats.response_headers());
        }
        if !stats.response_trailers().is_empty() {
            write_metadata(&mut out, "Response Trailers:", stats.response_trailers());
        }

        let _ = writeln!(out, "{} {:?}", "Request duration:".bold(), stats.duration());
        let _ = writeln!(out, "{} {} bytes", "Request size:".bold(), stats.request_size());
        let _ = write!(out, "{} {} bytes", "Response size:".bold(), stats.response_size());

        out
    }
}

fn write_metadata(out: &mut String, title: &str, metadata: &MetadataMap) {
    let _ = writeln!(out, "{}", title.bold());

    for entry in metadata.iter() {
        match entry {
            KeyAndValueRef::Ascii(key, value) => {
                let value = value.to_str().unwrap_or("<invalid>");
                let _ = writeln!(out, "  {}: {}", key.as_str().cyan(), value);
            }
            KeyAndValueRef::Binary(key, value) => {
                let _ = writeln!(out, "  {}: {:?}", key.as_str().cyan(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::VerboseReporter;
    use crate::stats::StatsContext;
    use tonic::Status;
    use tonic::metadata::{MetadataMap, MetadataValue};

    fn lines(rendered: &str) -> Vec<&str> {
        rendered.lines().collect()
    }

    #[test]
    fn renders_a_successful_call_in_order() {
        colored::control::set_override(false);

        let mut stats = StatsContext::new();
        let mut headers = MetadataMap::new();
        headers.insert("x-tenant", MetadataValue::from_static("acme"));
        stats.begin("/files.FileService/ListFiles");
        stats.record_request_headers(&headers);
        stats.add_request_bytes(5);
        stats.add_response_bytes(42);
        stats.finish();

        let rendered = VerboseReporter::render::<Status>(&stats.snapshot().unwrap(), None);
        let lines = lines(&rendered);

        assert_eq!(lines[0], "Method: /files.FileService/ListFiles");
        assert_eq!(lines[1], "Status: 0 OK");
        assert_eq!(lines[2], "Request Headers:");
        assert_eq!(lines[3], "  x-tenant: acme");
        assert!(lines[4].starts_with("Request duration: "));
        assert_eq!(lines[5], "Request size: 5 bytes");
        assert_eq!(lines[6], "Response size: 42 bytes");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn renders_error_status_and_non_empty_trailers() {
        colored::control::set_override(false);

        let mut stats = StatsContext::new();
        let mut trailers = MetadataMap::new();
        trailers.insert("grpc-status", MetadataValue::from_static("12"));
        stats.begin("/grpc.reflection.v1.ServerReflection/ServerReflectionInfo");
        stats.record_trailers(&trailers);
        stats.finish();

        let error = Status::unimplemented("not here");
        let rendered = VerboseReporter::render(&stats.snapshot().unwrap(), Some(&error));

        assert!(rendered.contains("Status: 12 Unimplemented"));
        assert!(!rendered.contains("Response Headers:"));
        assert!(rendered.contains("Response Trailers:\n  grpc-status: 12"));
    }
}
