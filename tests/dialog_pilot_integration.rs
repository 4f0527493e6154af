use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{sleep, timeout, Instant};

async fn wait_for_socket(path: &str) {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if Path::new(path).exists() {
            return;
        }
        if Instant::now() >= deadline {
            panic!("Socket did not appear: {}", path);
        }
        sleep(Duration::from_millis(50)).await;
    }
}

async fn send_request(socket_path: &str, request: serde_json::Value) -> serde_json::Value {
    let stream = UnixStream::connect(socket_path).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request_json = serde_json::to_string(&request).unwrap();
    writer.write_all(request_json.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();
    writer.flush().await.unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    serde_json::from_str(line.trim()).unwrap()
}

/// Start the binary around `sh -c <script>` with every file inside `dir`.
fn spawn_pilot(dir: &TempDir, script: &str, extra: &[&str]) -> (Child, String) {
    let socket_path = dir.path().join("pilot.sock").to_string_lossy().to_string();
    let child = Command::new(env!("CARGO_BIN_EXE_dialog-pilot"))
        .arg("--socket")
        .arg(&socket_path)
        .arg("--config")
        .arg(dir.path().join("settings.json"))
        .arg("--log-file")
        .arg(dir.path().join("output.log"))
        .arg("--state-file")
        .arg(dir.path().join("state.json"))
        .arg("--skip-log")
        .arg(dir.path().join("skipped.ndjson"))
        .arg("--no-sleep-prevention")
        .arg("--log-level")
        .arg("error")
        .arg("--rows")
        .arg("24")
        .arg("--cols")
        .arg("80")
        .args(extra)
        .arg("--")
        .arg("sh")
        .arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    (child, socket_path)
}

/// Read stdout until `expected` shows up after `after`.
async fn wait_for_output(stdout: &mut ChildStdout, after: &[u8], expected: &[u8]) {
    let mut output = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let start = if after.is_empty() {
            Some(0)
        } else {
            output
                .windows(after.len())
                .position(|w| w == after)
                .map(|pos| pos + after.len())
        };
        if let Some(start) = start {
            let rest = &output[start..];
            if rest.windows(expected.len()).any(|w| w == expected) {
                return;
            }
        }
        let now = Instant::now();
        if now >= deadline {
            panic!(
                "Timed out waiting for output. Output so far: {}",
                String::from_utf8_lossy(&output)
            );
        }
        let mut buf = [0u8; 512];
        let read = timeout(deadline - now, stdout.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        if read == 0 {
            panic!("stdout closed. Output so far: {}", String::from_utf8_lossy(&output));
        }
        output.extend_from_slice(&buf[..read]);
    }
}

#[tokio::test]
async fn test_mode_control_via_socket() {
    let dir = tempdir().unwrap();
    let (mut child, socket_path) = spawn_pilot(&dir, "cat", &[]);
    wait_for_socket(&socket_path).await;

    let response = send_request(&socket_path, json!({"type": "status"})).await;
    assert_eq!(response["type"], "status");
    assert_eq!(response["snapshot"]["mode"], "off");
    assert_eq!(response["label"], "Auto: OFF");

    let response = send_request(&socket_path, json!({"type": "set_mode", "mode": "continuous"})).await;
    assert_eq!(response["type"], "mode");
    assert_eq!(response["mode"], "continuous");
    assert_eq!(response["pause"], "none");

    let state = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
    assert!(state.contains("continuous"));

    let response = send_request(&socket_path, json!({"type": "resume"})).await;
    assert_eq!(response["type"], "error");

    let response = send_request(&socket_path, json!({"type": "shutdown"})).await;
    assert_eq!(response["type"], "ack");

    let _ = timeout(Duration::from_secs(5), child.wait()).await.unwrap();
}

#[tokio::test]
async fn test_send_types_into_child() {
    let dir = tempdir().unwrap();
    let (mut child, socket_path) = spawn_pilot(&dir, "printf ready; cat", &["--mode", "auto"]);
    wait_for_socket(&socket_path).await;
    let mut stdout = child.stdout.take().unwrap();
    wait_for_output(&mut stdout, b"", b"ready").await;

    let response = send_request(&socket_path, json!({"type": "send", "code": "2"})).await;
    assert_eq!(response["type"], "ack");
    assert_eq!(response["sent"], "2");

    // The PTY echoes what was typed
    wait_for_output(&mut stdout, b"ready", b"2").await;

    let response = send_request(&socket_path, json!({"type": "send", "code": "7"})).await;
    assert_eq!(response["type"], "error");

    let response = send_request(&socket_path, json!({"type": "shutdown"})).await;
    assert_eq!(response["type"], "ack");
    let _ = timeout(Duration::from_secs(5), child.wait()).await.unwrap();
}

#[tokio::test]
async fn test_dialog_answered_end_to_end() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("settings.json"),
        r#"{"autoResponseDelaySeconds": 1}"#,
    )
    .unwrap();

    let script = "sleep 0.5; printf '%s\\n' '╭──────────────────────────╮' \
                  '│ Do you want to create notes.md? │' '╰──────────────────────────╯'; cat";
    let (mut child, socket_path) = spawn_pilot(&dir, script, &["--mode", "auto"]);
    wait_for_socket(&socket_path).await;
    let mut stdout = child.stdout.take().unwrap();

    wait_for_output(&mut stdout, "╰──────────────────────────╯".as_bytes(), b"1").await;

    let skipped = std::fs::read_to_string(dir.path().join("skipped.ndjson")).unwrap();
    assert!(skipped.contains("auto_response"));

    let response = send_request(&socket_path, json!({"type": "shutdown"})).await;
    assert_eq!(response["type"], "ack");
    let _ = timeout(Duration::from_secs(5), child.wait()).await.unwrap();
}
