use file_service::{FILE_DESCRIPTOR_SET, FileServer, FileServiceServer};
use noodle_core::CancellationToken;
use noodle_core::connection::ConnectionConfig;
use noodle_core::reflection::{ReflectVersion, ReflectionClient};
use noodle_core::report::VerboseReporter;
use noodle_core::resolver::{CatalogResolver, FilesResolver, ReflectionResolver};
use noodle_core::session::{Session, SessionError, SessionOptions};
use std::path::PathBuf;
use std::time::Duration;
use tonic::service::Routes;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(path)
}

#[tokio::test]
async fn shared_imports_are_registered_once() {
    let options = SessionOptions {
        protos: vec![fixture("geo/b.proto")],
        imports: vec![fixture("geo")],
        ..SessionOptions::default()
    };

    let diagnosed = Session::bootstrap(&options, CancellationToken::new()).await;
    assert!(diagnosed.stats.is_none());
    let session = diagnosed.into_result().unwrap();

    let names = session.registry().file_names();
    assert_eq!(names.iter().filter(|n| *n == "a.proto").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "b.proto").count(), 1);
    assert!(session.registration_error().is_none());

    let method = session.registry().method("geo.Locator", "Locate").unwrap();
    assert_eq!(method.input().full_name(), "geo.Point");
}

#[tokio::test]
async fn import_directories_extend_the_registry() {
    let options = SessionOptions {
        protos: vec![fixture("shop/orders.proto")],
        imports: vec![fixture("geo")],
        ..SessionOptions::default()
    };

    let session = Session::bootstrap(&options, CancellationToken::new())
        .await
        .into_result()
        .unwrap();

    assert_eq!(session.catalog().services().len(), 1);
    assert!(session.registry().contains("orders.proto"));
    assert!(session.registry().pool().get_message_by_name("geo.Point").is_some());
}

#[tokio::test]
async fn files_mode_failures_carry_no_statistics() {
    let options = SessionOptions {
        protos: vec![fixture("broken")],
        ..SessionOptions::default()
    };

    let diagnosed = Session::bootstrap(&options, CancellationToken::new()).await;

    assert!(diagnosed.stats.is_none());
    assert!(matches!(diagnosed.result, Err(SessionError::Resolve(_))));
}

#[tokio::test]
async fn invalid_targets_fail_before_any_call() {
    let options = SessionOptions {
        target: "not a target".into(),
        ..SessionOptions::default()
    };

    let diagnosed = Session::bootstrap(&options, CancellationToken::new()).await;

    assert!(diagnosed.stats.is_none());
    assert!(matches!(diagnosed.result, Err(SessionError::Connection(_))));
}

#[tokio::test]
async fn reflection_sessions_expose_the_last_exchange() {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1alpha()
        .unwrap();
    let routes = Routes::new(reflection).add_service(FileServiceServer::new(FileServer::default()));

    let resolver = ReflectionResolver::new(
        ReflectionClient::new(routes),
        Duration::from_secs(5),
        ReflectVersion::Auto,
    );

    let diagnosed = Session::from_resolver(
        ConnectionConfig::default().factory(),
        CatalogResolver::Reflection(resolver),
    )
    .await;

    let stats = diagnosed.stats.clone().unwrap();
    let session = diagnosed.into_result().unwrap();

    assert!(session.catalog().service("files.FileService").is_some());
    assert!(
        session
            .registry()
            .method("files.FileService", "StreamFiles")
            .is_some_and(|m| m.is_server_streaming())
    );

    colored::control::set_override(false);
    let report = VerboseReporter::render::<tonic::Status>(&stats, None);
    assert!(report.starts_with(
        "Method: /grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo\nStatus: 0 OK\n"
    ));
}

#[tokio::test]
async fn files_resolver_can_back_a_session_directly() {
    let diagnosed = Session::from_resolver::<tonic::transport::Channel>(
        ConnectionConfig::default().factory(),
        CatalogResolver::Files(FilesResolver::new(vec![fixture("shop")], Vec::new())),
    )
    .await;

    let session = diagnosed.into_result().unwrap();
    assert_eq!(
        session.catalog().completion_candidates().first().map(String::as_str),
        Some("shop.CatalogService/GetItem")
    );
}
