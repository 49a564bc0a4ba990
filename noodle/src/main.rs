//! # Noodle CLI Entry Point
//!
//! The main executable for the Noodle tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`], installs logging
//!    and resolves the targets (`--endpoint`, or the endpoints of the config file).
//! 2. **Bootstrap**: Builds a [`Session`] against the first target, from local proto files or
//!    server reflection.
//! 3. **Execution**: Lists services, describes them, runs a health check, or calls a method
//!    on every target.
//! 4. **Presentation**: Formats and prints the resulting data, the error status and, in
//!    verbose mode, the diagnostics of the last call.
//!
//! Any setup or call error exits with status 1.
mod cli;
mod config;
mod formatter;
mod logging;

use clap::Parser;
use cli::{Cli, Commands};
use config::AppConfig;
use formatter::{FormattedString, GenericError, Health, ServiceList};
use noodle_core::{
    CancellationToken, StatusCode,
    catalog::{ServiceCatalog, ServiceMeta},
    grpc::{
        client::{self, GrpcClient},
        format, health,
    },
    prost_reflect::{DynamicMessage, MethodDescriptor},
    report::VerboseReporter,
    session::Session,
    stats::{CallStats, StatsContext},
    tonic::Status,
};
use std::io::{IsTerminal, Read};
use std::process;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let targets = match targets(&cli) {
        Ok(targets) => targets,
        Err(err) => {
            eprintln!(
                "{}",
                FormattedString::from(GenericError("Invalid configuration", format!("{err:#}")))
            );
            process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    if let Some(Commands::Health) = cli.command {
        return health_check(&cli, &targets, &cancel).await;
    }

    let session = bootstrap(&cli, &targets, cancel.clone()).await;

    match cli.command {
        Some(Commands::Discover) => discover(&cli, &session),
        _ => run_call(&cli, &session, &targets, &cancel).await,
    }
}

/// `--endpoint` wins; the config file is only read when no endpoint is given.
fn targets(cli: &Cli) -> anyhow::Result<Vec<String>> {
    if !cli.endpoints.is_empty() {
        return Ok(cli.endpoints.clone());
    }

    let config = AppConfig::load(cli.config.as_deref())?;
    for endpoint in &config.endpoints {
        tracing::debug!(%endpoint, "Endpoint from config");
    }
    Ok(config.targets())
}

fn first_target(targets: &[String]) -> &str {
    match targets.first() {
        Some(target) => target,
        None => {
            eprintln!(
                "{}",
                FormattedString::from(GenericError(
                    "No endpoint",
                    "use --endpoint or list endpoints in the config file"
                ))
            );
            process::exit(1);
        }
    }
}

async fn bootstrap(cli: &Cli, targets: &[String], cancel: CancellationToken) -> Session {
    // Files mode never contacts the server, so it does not need a target.
    let target = if cli.proto.is_empty() {
        first_target(targets).to_string()
    } else {
        targets.first().cloned().unwrap_or_default()
    };

    let diagnosed = Session::bootstrap(&cli.session_options(target), cancel).await;

    match diagnosed.result {
        Ok(session) => {
            if cli.verbose
                && let Some(err) = session.registration_error()
            {
                eprintln!("{}", FormattedString::from(err));
            }
            session
        }
        Err(err) => {
            if cli.verbose {
                print_report(diagnosed.stats.as_ref(), Some(&err));
            }
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}

/// Exact full name first, then a unique case-insensitive substring match.
fn find_service<'a>(catalog: &'a ServiceCatalog, name: &str) -> Result<&'a ServiceMeta, String> {
    if let Some(service) = catalog.service(name) {
        return Ok(service);
    }

    let needle = name.to_lowercase();
    let matches: Vec<&ServiceMeta> = catalog
        .services()
        .iter()
        .filter(|service| service.name().to_lowercase().contains(&needle))
        .collect();

    match matches.as_slice() {
        [service] => Ok(service),
        [] => Err(format!("No service matches '{name}'")),
        many => Err(format!(
            "'{name}' matches several services: {}",
            many.iter()
                .map(|service| service.name())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

fn service_or_exit<'a>(session: &'a Session, name: &str) -> &'a ServiceMeta {
    match find_service(session.catalog(), name) {
        Ok(service) => service,
        Err(err) => {
            eprintln!("{}", FormattedString::from(GenericError("Unknown service", err)));
            process::exit(1);
        }
    }
}

fn method_or_exit(session: &Session, service: &ServiceMeta, name: &str) -> MethodDescriptor {
    match session.registry().method(service.name(), name) {
        Some(method) => method,
        None => {
            eprintln!(
                "{}",
                FormattedString::from(GenericError(
                    "Unknown method",
                    format!("'{}' has no method '{name}'", service.name())
                ))
            );
            process::exit(1);
        }
    }
}

fn discover(cli: &Cli, session: &Session) {
    let Some(name) = &cli.service else {
        for service in session.catalog().services() {
            println!("{}", FormattedString::from(service.descriptor().clone()));
        }
        return;
    };

    let service = service_or_exit(session, name);
    match &cli.method {
        Some(method) => {
            let method = method_or_exit(session, service, method);
            println!("{}", FormattedString::from(method.clone()));
            for definition in formatter::method_types(&method) {
                println!("{definition}");
            }
        }
        None => println!("{}", FormattedString::from(service.descriptor().clone())),
    }
}

fn read_input(cli: &Cli) -> std::io::Result<String> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        let mut input = String::new();
        stdin.lock().read_to_string(&mut input)?;
        return Ok(input);
    }

    match &cli.input {
        Some(path) => std::fs::read_to_string(path),
        None => Ok(String::new()),
    }
}

async fn run_call(cli: &Cli, session: &Session, targets: &[String], cancel: &CancellationToken) {
    let (Some(service), Some(method)) = (&cli.service, &cli.method) else {
        match &cli.service {
            Some(name) => {
                let service = service_or_exit(session, name);
                println!("{}", FormattedString::from(service.descriptor().clone()));
            }
            None => println!("{}", FormattedString::from(ServiceList(session.catalog()))),
        }
        return;
    };

    let service = service_or_exit(session, service);
    let method = method_or_exit(session, service, method);

    let messages = match read_input(cli) {
        Ok(input) => format::parse_messages(&method.input(), &input, cli.informat),
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    };
    let messages = match messages {
        Ok(messages) => messages,
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    };

    first_target(targets);
    let mut failed = false;

    for target in targets {
        if targets.len() > 1 {
            println!("{}", FormattedString(format!("{target}:")));
        }
        if !call_target(cli, session, target, &method, messages.clone(), cancel).await {
            failed = true;
        }
    }

    if failed {
        process::exit(1);
    }
}

/// Calls `method` on `target`. Returns whether the call succeeded.
async fn call_target(
    cli: &Cli,
    session: &Session,
    target: &str,
    method: &MethodDescriptor,
    messages: Vec<DynamicMessage>,
    cancel: &CancellationToken,
) -> bool {
    let connection = match session.connect(target) {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            return false;
        }
    };

    let mut client = GrpcClient::from_connection(&connection).with_timeout(cli.deadline);
    let mut stats = StatsContext::new();

    let outcome = client::within(
        cli.deadline,
        cancel,
        client.call(method, messages, &mut stats),
    )
    .await
    .unwrap_or_else(|status| Ok(Err(status)));

    match outcome {
        Ok(Ok(responses)) => {
            for response in &responses {
                match format::render_message(response, cli.outformat, cli.out_json_names) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(err) => {
                        eprintln!("{}", FormattedString::from(err));
                        return false;
                    }
                }
            }
            if cli.verbose {
                print_report::<Status>(stats.snapshot().as_ref(), None);
            }
            true
        }
        Ok(Err(status)) => {
            if cli.verbose {
                print_report(stats.snapshot().as_ref(), Some(&status));
            }
            eprintln!("{}", FormattedString::from(status));
            false
        }
        Err(err) => {
            if cli.verbose {
                print_report(stats.snapshot().as_ref(), Some(&err));
            }
            eprintln!("{}", FormattedString::from(err));
            false
        }
    }
}

async fn health_check(cli: &Cli, targets: &[String], cancel: &CancellationToken) {
    let factory = cli
        .session_options(first_target(targets).to_string())
        .connection_config()
        .factory();
    let name = cli.service.clone().unwrap_or_default();
    let mut failed = false;

    for target in targets {
        let connection = match factory.connect_lazy(target) {
            Ok(connection) => connection,
            Err(err) => {
                eprintln!("{}", FormattedString::from(err));
                failed = true;
                continue;
            }
        };

        let mut stats = StatsContext::new();
        let outcome = client::within(
            cli.deadline,
            cancel,
            health::check(connection.channel(), &name, connection.headers(), &mut stats),
        )
        .await
        .and_then(|result| result);

        match outcome {
            Ok(status) => {
                if cli.verbose {
                    print_report::<Status>(stats.snapshot().as_ref(), None);
                }
                println!("{}", FormattedString::from(Health(target, status)));
                failed |= status != health::ServingStatus::Serving;
            }
            Err(status) => {
                if cli.verbose {
                    print_report(stats.snapshot().as_ref(), Some(&status));
                }
                eprintln!("{}", FormattedString::from(status));
                failed = true;
            }
        }
    }

    if failed {
        process::exit(1);
    }
}

fn print_report<E: StatusCode>(stats: Option<&CallStats>, error: Option<&E>) {
    if let Some(stats) = stats {
        println!("{}", FormattedString(VerboseReporter::render(stats, error)));
    }
}

#[cfg(test)]
mod tests {
    use super::find_service;
    use noodle_core::catalog::ServiceCatalog;

    #[test]
    fn unknown_services_are_reported() {
        let err = find_service(&ServiceCatalog::default(), "files").unwrap_err();
        assert_eq!(err, "No service matches 'files'");
    }
}
