#![cfg(unix)]

use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_sigterm_drains_and_saves_recording() {
    let temp = TempDir::new().unwrap();
    let child = Command::new(assert_cmd::cargo::cargo_bin("sigcap"))
        .args([
            "record",
            "-t",
            "eeg",
            "--duration",
            "60",
            "--discovery-timeout",
            "0.2",
            "--flat",
            "--no-hotkey",
            "--no-log-file",
            "--json",
            "-q",
            "-o",
        ])
        .arg(temp.path())
        .env_remove("RUST_LOG")
        .env_remove("SIGCAP_TRANSPORT")
        .env_remove("SIGCAP_TYPES")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(1500));
    let killed = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["stop_reason"], "interrupted");
    let rows = summary["streams"][0]["rows_written"].as_u64().unwrap();
    assert!(rows > 0);

    let eeg = std::fs::read_to_string(temp.path().join("EEG_signal.csv")).unwrap();
    assert_eq!(eeg.lines().count() as u64, rows + 1);
}
