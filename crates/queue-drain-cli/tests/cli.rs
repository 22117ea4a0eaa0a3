//! Binary-level tests for the queue-drain command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

fn queue_drain(workdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("queue-drain").unwrap();
    cmd.current_dir(workdir.path())
        .env_remove("AZURE_STORAGE_CONNECTION_STRING")
        .env_remove("QUEUE_DRAIN_CONFIG")
        .env_remove("RUST_LOG")
        .env("QUEUE_DRAIN__RETRY__MAX_RETRIES", "0");
    cmd
}

fn connection_string(endpoint: &str) -> String {
    format!(
        "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;AccountKey={};QueueEndpoint={}/devstoreaccount1",
        DEV_KEY, endpoint
    )
}

#[test]
fn test_help_lists_commands() {
    let workdir = TempDir::new().unwrap();
    queue_drain(&workdir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("drain"))
        .stdout(predicate::str::contains("send"));
}

#[test]
fn test_missing_connection_string_exits_with_config_error() {
    let workdir = TempDir::new().unwrap();
    queue_drain(&workdir)
        .arg("drain")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("connection_string"));
}

#[test]
fn test_invalid_queue_name_exits_with_config_error() {
    let workdir = TempDir::new().unwrap();
    queue_drain(&workdir)
        .args([
            "--connection-string",
            "UseDevelopmentStorage=true",
            "drain",
            "--queue",
            "Not_Valid",
        ])
        .assert()
        .code(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_drain_prints_banner_and_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devstoreaccount1/orders/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<QueueMessagesList><QueueMessage><MessageId>msg-1</MessageId><PopReceipt>r-1</PopReceipt><DequeueCount>1</DequeueCount><MessageText>order-123</MessageText></QueueMessage></QueueMessagesList>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/devstoreaccount1/orders/messages/msg-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let workdir = TempDir::new().unwrap();
    queue_drain(&workdir)
        .env("AZURE_STORAGE_CONNECTION_STRING", connection_string(&server.uri()))
        .arg("drain")
        .assert()
        .success()
        .stdout("Reading messages from the Queue...\nMessage content: order-123\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_authentication_failure_exits_without_banner() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403).insert_header("x-ms-error-code", "AuthenticationFailed"),
        )
        .mount(&server)
        .await;

    let workdir = TempDir::new().unwrap();
    queue_drain(&workdir)
        .env("AZURE_STORAGE_CONNECTION_STRING", connection_string(&server.uri()))
        .arg("drain")
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_queue_exits_with_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).insert_header("x-ms-error-code", "QueueNotFound"))
        .mount(&server)
        .await;

    let workdir = TempDir::new().unwrap();
    queue_drain(&workdir)
        .env("AZURE_STORAGE_CONNECTION_STRING", connection_string(&server.uri()))
        .args(["drain", "--queue", "missing"])
        .assert()
        .code(3);
}

#[test]
fn test_unreachable_service_exits_with_connection_error() {
    let workdir = TempDir::new().unwrap();
    queue_drain(&workdir)
        .env(
            "AZURE_STORAGE_CONNECTION_STRING",
            connection_string("http://127.0.0.1:1"),
        )
        .arg("drain")
        .assert()
        .code(4)
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_config_file_in_working_directory_is_used() {
    let workdir = TempDir::new().unwrap();
    std::fs::write(
        workdir.path().join("queue-drain.toml"),
        "connection_string = \"UseDevelopmentStorage=true\"\n[drain]\nbatch_size = 0\n",
    )
    .unwrap();

    // batch_size = 0 fails validation, proving the file was read
    queue_drain(&workdir)
        .arg("drain")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("drain.batch_size"));
}
