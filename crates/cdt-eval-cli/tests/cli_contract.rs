#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ONE_CASE: &str = r#"
version: 1
cases:
  - id: checkup-cleaning
    name: "Checkup + Cleaning"
    categories: [preventive]
    input: "Routine checkup with oral exam and adult cleaning."
    expected_codes: [D0120, D1110]
"#;

fn cdt_eval(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cdt-eval").unwrap();
    cmd.current_dir(dir)
        .env_remove("CDT_EVAL_URL")
        .env_remove("CDT_EVAL_MODEL")
        .env_remove("CDT_EVAL_TIMEOUT")
        .env_remove("CDT_EVAL_POOL_SIZE");
    cmd
}

fn tags() -> Value {
    json!({"models": [{"name": "llama3:8b", "model": "llama3:8b"}]})
}

fn write_catalog(dir: &Path) -> std::path::PathBuf {
    let p = dir.join("cases.yaml");
    fs::write(&p, ONE_CASE).unwrap();
    p
}

#[test]
fn test_status_on_fresh_store_exits_zero() {
    let dir = tempdir().unwrap();
    cdt_eval(dir.path())
        .args(["status", "--results"])
        .arg(dir.path().join("results.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Untested: 28"));
}

#[test]
fn test_corrupt_results_file_exits_two() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results.json");
    fs::write(&results, "{ not json").unwrap();

    cdt_eval(dir.path())
        .arg("status")
        .arg("--results")
        .arg(&results)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("fatal"));

    // A corrupt store is reported, never overwritten.
    assert_eq!(fs::read_to_string(&results).unwrap(), "{ not json");
}

#[test]
fn test_unreachable_service_exits_two_and_writes_nothing() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("results.json");

    cdt_eval(dir.path())
        .args(["run-all", "--url", "http://127.0.0.1:9/api/chat", "--results"])
        .arg(&results)
        .assert()
        .code(2);

    assert!(!results.exists(), "aborted run must not create a store");
}

#[test]
fn test_invalid_pool_size_exits_two() {
    let dir = tempdir().unwrap();
    cdt_eval(dir.path())
        .args(["run-all", "--pool-size", "0"])
        .assert()
        .code(2);
}

#[test]
fn test_categories_lists_catalog() {
    let dir = tempdir().unwrap();
    cdt_eval(dir.path())
        .arg("categories")
        .assert()
        .success()
        .stdout(predicate::str::contains("preventive"))
        .stdout(predicate::str::contains("28 case(s)"));
}

#[test]
fn test_unknown_category_exits_two() {
    let dir = tempdir().unwrap();
    let catalog = write_catalog(dir.path());
    cdt_eval(dir.path())
        .args(["run", "--category", "orthodontics", "--catalog"])
        .arg(&catalog)
        .args(["--url", "http://127.0.0.1:9/api/chat"])
        .assert()
        .code(2);
}

#[test]
fn test_check_catalog_reports_missing_codes() {
    let dir = tempdir().unwrap();
    let catalog = write_catalog(dir.path());
    let codes = dir.path().join("codes.json");
    fs::write(
        &codes,
        json!([{"code": "D0120", "description": "Periodic oral evaluation"}]).to_string(),
    )
    .unwrap();

    cdt_eval(dir.path())
        .args(["check-catalog", "--codes"])
        .arg(&codes)
        .arg("--catalog")
        .arg(&catalog)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("D1110"))
        .stdout(predicate::str::contains("checkup-cleaning"));

    fs::write(
        &codes,
        json!([{"code": "D0120"}, {"code": "D1110"}]).to_string(),
    )
    .unwrap();
    cdt_eval(dir.path())
        .args(["check-catalog", "--codes"])
        .arg(&codes)
        .arg("--catalog")
        .arg(&catalog)
        .assert()
        .success();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_all_against_mock_service_records_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tags()))
        .mount(&server)
        .await;
    let content = json!({"cdt_codes": [{"code": "D0120"}, {"code": "D1110"}]}).to_string();
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": {"content": content}})),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let catalog = write_catalog(dir.path());
    let results = dir.path().join("results.json");
    let url = format!("{}/api/chat", server.uri());

    cdt_eval(dir.path())
        .args(["run-all", "--url", &url, "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .success();

    let doc: Value = serde_json::from_str(&fs::read_to_string(&results).unwrap()).unwrap();
    let case = &doc["cases"]["checkup-cleaning"];
    assert_eq!(case["bucket"], "passing-both");
    assert_eq!(case["verdict"]["passed"], true);

    cdt_eval(dir.path())
        .args(["passed", "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("checkup-cleaning"));

    // Nothing left to run.
    cdt_eval(dir.path())
        .args(["run-needs-work", "--url", "http://127.0.0.1:9/api/chat", "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .success();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_codes_exit_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tags()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": {"content": "Suggested: D0150 only"}})),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let catalog = write_catalog(dir.path());
    let results = dir.path().join("results.json");
    let url = format!("{}/api/chat", server.uri());

    cdt_eval(dir.path())
        .args(["run-all", "--url", &url, "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("checkup-cleaning"));

    cdt_eval(dir.path())
        .args(["needs-work", "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("Needs work (1)"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_model_exits_two_with_pull_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"models": [{"name": "mistral:7b"}]})),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let catalog = write_catalog(dir.path());
    let results = dir.path().join("results.json");
    let url = format!("{}/api/chat", server.uri());

    cdt_eval(dir.path())
        .args(["run-all", "--url", &url, "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ollama pull llama3:8b"));
    assert!(!results.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_error_on_single_case_is_recorded_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tags()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("runner crashed"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let catalog = write_catalog(dir.path());
    let results = dir.path().join("results.json");
    let url = format!("{}/api/chat", server.uri());

    cdt_eval(dir.path())
        .args(["run", "--category", "preventive", "--url", &url, "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .code(1);

    let doc: Value = serde_json::from_str(&fs::read_to_string(&results).unwrap()).unwrap();
    let case = &doc["cases"]["checkup-cleaning"];
    assert_eq!(case["bucket"], "needs-work");
    assert_eq!(case["verdict"]["failure"], "service_unavailable");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tune_saves_recommended_pool_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tags()))
        .mount(&server)
        .await;
    let content = json!({"cdt_codes": [{"code": "D0120"}, {"code": "D1110"}]}).to_string();
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": {"content": content}})),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let catalog = write_catalog(dir.path());
    let results = dir.path().join("results.json");
    let url = format!("{}/api/chat", server.uri());

    cdt_eval(dir.path())
        .args(["tune", "--sizes", "1", "--sample", "1", "--url", &url, "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved pool size 1"));

    let doc: Value = serde_json::from_str(&fs::read_to_string(&results).unwrap()).unwrap();
    assert_eq!(doc["tuned_pool_size"], 1);

    cdt_eval(dir.path())
        .args(["status", "--catalog"])
        .arg(&catalog)
        .arg("--results")
        .arg(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("Tuned pool size: 1"));
}
