use std::fs;
use std::process::Command;

use citymind::schema::FULL_SOCIAL;
use serde_json::Value;
use tempfile::tempdir;

#[test]
fn expand_prints_the_full_social_row_without_the_target() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("proxy.json");
    fs::write(
        &input,
        r#"{"target": "depression_crudeprev", "use_social": "yes", "health_index": 0.5}"#,
    )
    .expect("write proxy vector");

    let exe = env!("CARGO_BIN_EXE_citymind");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["expand", input.to_str().expect("path str")])
        .output()
        .expect("run citymind cli");
    assert!(output.status.success(), "CLI exited with status {:?}", output.status);

    let row: Value = serde_json::from_slice(&output.stdout).expect("JSON feature row");
    let row = row.as_object().expect("object");
    assert_eq!(row.len(), FULL_SOCIAL.len() - 1);
    assert!(!row.contains_key("depression_crudeprev"));
    assert!(row.contains_key("isolation_crudeprev"));
}

#[test]
fn predict_without_trained_models_fails_with_the_missing_path() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("proxy.json");
    fs::write(&input, r#"{"target": "mhlth_crudeprev", "use_social": false}"#)
        .expect("write proxy vector");

    let exe = env!("CARGO_BIN_EXE_citymind");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["predict", input.to_str().expect("path str")])
        .output()
        .expect("run citymind cli");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error: No model was found at:"), "stderr: {stderr}");
    assert!(stderr.contains("boosted_no_social_mhlth.toml"), "stderr: {stderr}");
}

#[test]
fn version_prints_the_package_name() {
    let exe = env!("CARGO_BIN_EXE_citymind");
    let output = Command::new(exe)
        .arg("version")
        .output()
        .expect("run citymind cli");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("citymind "), "stdout: {stdout}");
}

#[test]
fn log_file_receives_records_and_stdout_stays_json() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("proxy.json");
    fs::write(&input, r#"{"target": "mhlth_crudeprev", "use_social": false}"#)
        .expect("write proxy vector");

    let exe = env!("CARGO_BIN_EXE_citymind");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .env("RUST_LOG", "debug")
        .args([
            "--log-file",
            "logs/pipeline.log",
            "expand",
            input.to_str().expect("path str"),
        ])
        .output()
        .expect("run citymind cli");
    assert!(output.status.success(), "CLI exited with status {:?}", output.status);
    serde_json::from_slice::<Value>(&output.stdout).expect("JSON feature row");

    let log = fs::read_to_string(tmp.path().join("logs").join("pipeline.log")).expect("log file");
    assert!(
        log.contains("DEBUG - Expanded proxy vector into"),
        "log: {log}"
    );
    assert!(String::from_utf8_lossy(&output.stderr).is_empty());
}
