#![allow(deprecated)]
//! CLI contract: exit codes and output for each subcommand, without brittle
//! full-output matching.

use assert_cmd::Command;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn podbench() -> Command {
    let mut cmd = Command::cargo_bin("podbench").unwrap();
    for var in [
        "PODBENCH_CACHE",
        "PODBENCH_CACHE_FILE",
        "PODBENCH_EMAIL",
        "PODBENCH_WEBID",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "expected output to contain {needle:?}\n--- output ---\n{haystack}\n--- end ---"
    );
}

#[test]
fn fetch_requires_url_clap_error() {
    let output = podbench().args(["fetch"]).output().unwrap();
    let code = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(code, 2, "expected clap usage exit\n{stderr}");
    assert_contains(&stderr.to_lowercase(), "required");
}

#[test]
fn cache_reset_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bench.cache");
    std::fs::write(&file, r#"{"publicResources":["http://pod/a"]}"#).unwrap();

    let output = podbench()
        .args(["cache", "reset", "--file"])
        .arg(&file)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(!file.exists());

    // Missing file is not an error.
    let output = podbench()
        .args(["cache", "reset", "--file"])
        .arg(&file)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_public_resource_prints_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public/readme"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello pod"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/public/readme", server.uri());
    let output = podbench()
        .args(["fetch", "--no-enroll", &url])
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(0), "{stderr}");
    assert_contains(&stdout, "hello pod");
    assert_contains(&stderr, "HTTP 200");
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_non_success_status_exits_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let output = podbench()
        .args(["fetch", "--no-enroll", &url])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_protected_resource_without_enrollment_exits_two() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uma/.well-known/uma2-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_endpoint": format!("{}/uma/token", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "www-authenticate",
            format!(r#"UMA as_uri="{}/uma", ticket="T1""#, server.uri()).as_str(),
        ))
        .mount(&server)
        .await;

    let url = format!("{}/private", server.uri());
    let output = podbench()
        .args(["fetch", "--no-enroll", &url])
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(2), "{stderr}");
    assert_contains(&stderr, "not initialized");
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_with_failed_enrollment_exits_two() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.account/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    let output = podbench()
        .env("PODBENCH_IDP_URL", server.uri())
        .env("PODBENCH_EMAIL", "alice@example.org")
        .env("PODBENCH_WEBID", format!("{}/alice/profile/card#me", server.uri()))
        .args(["wait", &format!("{}/svc/", server.uri())])
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(2), "{stderr}");
}
