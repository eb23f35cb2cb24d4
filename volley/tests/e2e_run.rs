use std::process::Command;

use volley_testserver::TestServer;

fn write_script(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    if let Err(err) = std::fs::write(&path, contents) {
        panic!("failed to write script: {err}");
    }
    path
}

fn run_volley(args: &[&str]) -> std::process::Output {
    match Command::new(env!("CARGO_BIN_EXE_volley")).args(args).output() {
        Ok(out) => out,
        Err(err) => panic!("failed to spawn volley: {err}"),
    }
}

#[tokio::test]
async fn run_produces_a_json_report_against_a_live_target() {
    let server = match TestServer::start().await {
        Ok(s) => s,
        Err(err) => panic!("failed to start test server: {err}"),
    };

    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(err) => panic!("tempdir: {err}"),
    };
    let script = write_script(
        &dir,
        "smoke.yaml",
        &format!(
            r#"
config:
  target: "{target}"
  phases:
    - duration: 1
      arrivalRate: 3
scenarios:
  - name: browse
    flow:
      - get:
          url: "/hello"
      - get:
          url: "/json"
          capture:
            json: "$.token"
            as: token
          match:
            json: "$.user.name"
            value: ada
"#,
            target = server.base_url()
        ),
    );

    let script_path = script.to_string_lossy().to_string();
    let output = tokio::task::spawn_blocking(move || {
        run_volley(&["run", "--json", "--quiet", &script_path])
    })
    .await;
    let output = match output {
        Ok(out) => out,
        Err(err) => panic!("join error: {err}"),
    };

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = match serde_json::from_slice(&output.stdout) {
        Ok(v) => v,
        Err(err) => panic!(
            "invalid JSON report: {err}\nstdout: {}",
            String::from_utf8_lossy(&output.stdout)
        ),
    };

    let created = report["scenariosCreated"].as_u64().unwrap_or(0);
    let completed = report["scenariosCompleted"].as_u64().unwrap_or(0);
    let requests = report["requestsCompleted"].as_u64().unwrap_or(0);

    assert!(created > 0, "report: {report}");
    assert_eq!(created, completed, "report: {report}");
    assert_eq!(requests, created * 2, "report: {report}");
    assert_eq!(report["matches"].as_u64(), Some(created));
    assert!(report["codes"]["200"].as_u64().unwrap_or(0) >= requests);
    assert_eq!(server.stats().requests_total(), requests);

    server.shutdown().await;
}

#[test]
fn malformed_scripts_exit_with_config_error() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(err) => panic!("tempdir: {err}"),
    };
    let script = write_script(
        &dir,
        "broken.yaml",
        r#"
config:
  phases:
    - duration: 10
scenarios:
  - flow: []
"#,
    );

    let output = run_volley(&["run", &script.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn missing_script_file_exits_with_config_error() {
    let output = run_volley(&["run", "/nonexistent/volley-script.yaml"]);
    assert_eq!(output.status.code(), Some(2));
}
