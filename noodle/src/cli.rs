//! # CLI
//!
//! This module defines the command-line interface of `noodle` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers
//! are `key=value` and deadlines are valid durations).
use clap::{ArgAction, Parser, Subcommand};
use noodle_core::connection::Headers;
use noodle_core::grpc::format::MsgFormat;
use noodle_core::reflection::ReflectVersion;
use noodle_core::session::SessionOptions;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "noodle",
    version,
    about = "Generic gRPC client",
    disable_version_flag = true
)]
pub struct Cli {
    /// Print version
    #[arg(long, action = ArgAction::Version)]
    version: Option<bool>,

    /// Full or partial gRPC service name
    #[arg(short, long, global = true)]
    pub service: Option<String>,

    /// gRPC service method name
    #[arg(short, long)]
    pub method: Option<String>,

    /// File with the request message(s); ignored when stdin is piped
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Call deadline, e.g. 15s, 3m, 1h. A bare number is read as seconds
    #[arg(short, long, default_value = "15s", value_parser = parse_deadline, global = true)]
    pub deadline: Duration,

    /// Output additional information like request duration and message sizes
    #[arg(short = 'V', long, global = true)]
    pub verbose: bool,

    /// Use TLS when connecting to the server
    #[arg(long, global = true)]
    pub tls: bool,

    /// Skip the server's certificate chain and host name verification (testing only)
    #[arg(long, global = true)]
    pub insecure: bool,

    /// CA certificate used to verify the server, ignored with --insecure
    #[arg(long, global = true)]
    pub cacert: Option<PathBuf>,

    /// Client certificate to present to the server, only valid with --certkey
    #[arg(long, global = true)]
    pub cert: Option<PathBuf>,

    /// Client private key, only valid with --cert
    #[arg(long, global = true)]
    pub certkey: Option<PathBuf>,

    /// Proto files or directories to search for proto files. Disables server reflection
    #[arg(long, value_delimiter = ',', global = true)]
    pub proto: Vec<PathBuf>,

    /// Additional directories to search for imports and Any types
    #[arg(long, value_delimiter = ',', global = true)]
    pub protoimports: Vec<PathBuf>,

    /// Extra header(s) to include in the request, as key=value (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header, global = true)]
    pub headers: Vec<(String, String)>,

    /// Override the :authority header
    #[arg(long, default_value = "", global = true)]
    pub authority: String,

    /// Input message format: json or text
    #[arg(long, visible_alias = "if", default_value_t = MsgFormat::Json)]
    pub informat: MsgFormat,

    /// Output message format: json or text
    #[arg(long, visible_alias = "of", default_value_t = MsgFormat::Json)]
    pub outformat: MsgFormat,

    /// Send keepalive pings even without active calls
    #[arg(long, global = true)]
    pub keepalive: bool,

    /// Interval between keepalive pings, e.g. 30s
    #[arg(long, value_parser = parse_deadline, global = true)]
    pub keepalive_time: Option<Duration>,

    /// Max receive message size in bytes, 0 keeps the transport default
    #[arg(
        long,
        visible_aliases = ["mrms", "max-recv-msg-size"],
        default_value_t = 0,
        global = true
    )]
    pub max_receive_message_size: usize,

    /// host:port of the service (repeatable)
    #[arg(short, long = "endpoint", value_delimiter = ',', global = true)]
    pub endpoints: Vec<String>,

    /// Use json_name properties (lower camel case) in JSON output
    #[arg(long)]
    pub out_json_names: bool,

    /// Server reflection version: v1alpha, v1 or auto
    #[arg(long, default_value_t = ReflectVersion::V1Alpha, global = true)]
    pub reflect_version: ReflectVersion,

    /// JSON configuration file with the default endpoints
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the definition of a service (or of every service)
    Discover,
    /// Run a gRPC health check against every endpoint
    Health,
}

impl Cli {
    /// Session options for bootstrapping against `target`.
    pub fn session_options(&self, target: String) -> SessionOptions {
        let mut headers = Headers::new();
        for (key, value) in &self.headers {
            headers.entry(key.clone()).or_default().push(value.clone());
        }

        SessionOptions {
            target,
            deadline: self.deadline,
            reflect_version: self.reflect_version,
            protos: self.proto.clone(),
            imports: self.protoimports.clone(),
            tls: self.tls,
            insecure: self.insecure,
            cacert: self.cacert.clone(),
            cert: self.cert.clone(),
            certkey: self.certkey.clone(),
            authority: self.authority.clone(),
            keepalive: self.keepalive,
            keepalive_time: self.keepalive_time.unwrap_or_default(),
            max_receive_message_size: self.max_receive_message_size,
            headers,
        }
    }
}

fn parse_deadline(value: &str) -> Result<Duration, String> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).map_err(|e| format!("Invalid duration '{value}': {e}"))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| "Format must be 'key=value'".to_string())
}
