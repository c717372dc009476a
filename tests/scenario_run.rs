//! End-to-end runs of the binary against a local stub server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use assert_cmd::Command;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

/// Serve `/api/images/numbers/{n}` with a fixed status on an ephemeral port.
fn spawn_stub(rt: &tokio::runtime::Runtime, status: StatusCode) -> SocketAddr {
    rt.block_on(async move {
        let app = Router::new().route(
            "/api/images/numbers/{n}",
            get(move |Path(n): Path<u64>| async move { (status, format!("image {}", n)) }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    })
}

fn write_config(dir: &std::path::Path, addr: SocketAddr, store_db: Option<&str>) -> PathBuf {
    let storage = match store_db {
        Some(db) => format!("enabled = true\ndb_path = \"{}\"", db),
        None => "enabled = false".to_string(),
    };
    let config = format!(
        r#"
[request]
url = "http://{addr}/api/images/numbers/{{n}}"
expected_status = 200

[scenarios.spike]
executor = "ramping-vus"
start_vus = 1
stages = [
    {{ duration = "300ms", target = 4 }},
    {{ duration = "200ms", target = 0 }},
]
graceful_stop = "2s"

[thresholds]
http_req_failed = ["rate<0.01"]
checks = ["rate>0.99"]

[output]
progress_interval = "10s"

[storage]
{storage}
"#
    );
    let path = dir.join("rampede.toml");
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn test_run_passes_against_healthy_stub() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let addr = spawn_stub(&rt, StatusCode::OK);
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path(), addr, None);
    let export = dir.path().join("summary.json");

    Command::cargo_bin("rampede")
        .unwrap()
        .args(["run", "--config"])
        .arg(&config)
        .arg("--summary-export")
        .arg(&export)
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicates::str::contains("Load Test Summary"))
        .stdout(predicates::str::contains("PASS"));

    let raw = std::fs::read_to_string(&export).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["status"], "passed");
    assert_eq!(value["thresholds"].as_array().unwrap().len(), 2);
    assert!(value["summary"]["http_reqs"].as_u64().unwrap() > 0);
    let checks = &value["summary"]["checks"];
    assert_eq!(checks["trues"], checks["total"]);
}

#[test]
fn test_run_fails_thresholds_against_erroring_stub() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let addr = spawn_stub(&rt, StatusCode::INTERNAL_SERVER_ERROR);
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path(), addr, None);

    Command::cargo_bin("rampede")
        .unwrap()
        .args(["run", "--config"])
        .arg(&config)
        .timeout(Duration::from_secs(30))
        .assert()
        .code(2)
        .stdout(predicates::str::contains("FAIL"));
}

#[test]
fn test_history_shows_recorded_run() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let addr = spawn_stub(&rt, StatusCode::OK);
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("runs.db");
    let db = db.to_str().unwrap();
    let config = write_config(dir.path(), addr, Some(db));

    Command::cargo_bin("rampede")
        .unwrap()
        .args(["run", "--config"])
        .arg(&config)
        .timeout(Duration::from_secs(30))
        .assert()
        .success();

    Command::cargo_bin("rampede")
        .unwrap()
        .args(["history", "--db", db])
        .assert()
        .success()
        .stdout(predicates::str::contains("passed"))
        .stdout(predicates::str::contains("spike"));
}

#[test]
fn test_url_override_beats_config() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let addr = spawn_stub(&rt, StatusCode::OK);
    let dir = tempfile::TempDir::new().unwrap();
    // Config points at a dead port; the flag points at the live stub.
    let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let config = write_config(dir.path(), dead, None);
    let url = format!("http://{}/api/images/numbers/{{n}}", addr);

    Command::cargo_bin("rampede")
        .unwrap()
        .args(["run", "--config"])
        .arg(&config)
        .args(["--url", &url])
        .timeout(Duration::from_secs(30))
        .assert()
        .success();
}
