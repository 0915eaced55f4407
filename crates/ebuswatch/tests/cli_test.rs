//! Integration tests for the `ebuswatch` CLI binary.
//!
//! Argument parsing, config handling and the one-shot daemon commands
//! against a scripted fake ebusd on a plain std TCP listener.
#![allow(clippy::unwrap_used)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `ebuswatch` binary with env isolation.
fn ebuswatch_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ebuswatch");
    cmd.env("HOME", "/tmp/ebuswatch-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/ebuswatch-cli-test-nonexistent")
        .env_remove("EBUSWATCH_CONFIG")
        .env_remove("EBUSWATCH_DAEMON__HOST")
        .env_remove("EBUSWATCH_DAEMON__PORT")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("ebuswatch.toml");
    std::fs::write(&path, body).unwrap();
    path
}

/// Serve a single connection, answering every command line with `reply`.
fn fake_ebusd(reply: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            if line.is_err() || writer.write_all(reply.as_bytes()).is_err() {
                break;
            }
        }
    });
    port
}

/// Serve one WebSocket client on a background runtime. `{"cmd":"all"}`
/// is answered with `snapshot`; every other text frame is reported.
fn fake_device_gateway(snapshot: serde_json::Value) -> (u16, mpsc::Receiver<String>) {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::channel();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                let Message::Text(text) = frame else { continue };
                let request: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if request["cmd"] == "all" {
                    ws.send(Message::text(snapshot.to_string())).await.unwrap();
                } else {
                    let _ = seen_tx.send(text.as_str().to_owned());
                }
            }
        });
    });
    (port, seen_rx)
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = ebuswatch_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "expected usage, got:\n{stderr}");
}

#[test]
fn test_help_lists_commands() {
    ebuswatch_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("read"))
            .and(predicate::str::contains("write"))
            .and(predicate::str::contains("probe")),
    );
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    ebuswatch_cmd()
        .args(["config", "path", "--config", "/etc/ebuswatch/custom.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/etc/ebuswatch/custom.toml"));
}

#[test]
fn test_config_show_merges_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[daemon]\nhost = \"ebusd.lan\"\n");

    ebuswatch_cmd()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("host = \"ebusd.lan\"")
                .and(predicate::str::contains("port = 8888")),
        );
}

#[test]
fn test_missing_host_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[daemon]\nport = 8888\n");

    ebuswatch_cmd()
        .args(["info", "--config"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("daemon.host"));
}

#[test]
fn test_probe_without_gateway_is_usage_error() {
    ebuswatch_cmd()
        .args(["probe", "-H", "127.0.0.1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No device gateway configured"));
}

#[test]
fn test_switch_without_gateway_is_usage_error() {
    ebuswatch_cmd()
        .args(["switch", "relay", "1_01", "on", "-H", "127.0.0.1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No device gateway configured"));
}

#[test]
fn test_switch_sets_output_and_reports_it() {
    let (port, seen) = fake_device_gateway(serde_json::json!([
        {"dev": "relay", "circuit": "1_02", "value": 0},
        {"dev": "relay", "circuit": "1_01", "value": 0}
    ]));
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        &format!("[device_gateway]\nhost = \"127.0.0.1\"\nport = {port}\nname = \"Board\"\n"),
    );

    ebuswatch_cmd()
        .args(["switch", "relay", "1.01", "on", "--negate", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Board: relay 1_01 = 0"));

    let sent: serde_json::Value = serde_json::from_str(&seen.recv().unwrap()).unwrap();
    assert_eq!(
        sent,
        serde_json::json!({"cmd": "set", "dev": "relay", "circuit": "1_01", "value": 0})
    );
}

// ── Daemon commands ─────────────────────────────────────────────────

#[test]
fn test_info_prints_report() {
    let port = fake_ebusd("version: ebusd 23.2\nsignal: acquired\n\n");

    ebuswatch_cmd()
        .args(["info", "-H", "127.0.0.1", "-P", &port.to_string()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("version: ebusd 23.2")
                .and(predicate::str::contains("signal: acquired")),
        );
}

#[test]
fn test_read_decodes_catalog_field() {
    let port = fake_ebusd("bai FlowTemp = 45.46\n\n");
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        &format!(
            "[daemon]\nhost = \"127.0.0.1\"\nport = {port}\n\n\
             [daemon.circuits]\nbai = \"Boiler\"\n\n\
             [[catalog]]\ncircuit = \"bai\"\n\
             fields = [{{ name = \"FlowTemp\", title = \"Flow temperature\", unit = \"temp\" }}]\n"
        ),
    );

    ebuswatch_cmd()
        .args(["read", "bai", "FlowTemp", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Flow temperature = 45.5"));
}

#[test]
fn test_read_rejected_field_exits_not_found() {
    let port = fake_ebusd("ERR: element not found\n\n");

    ebuswatch_cmd()
        .args(["read", "bai", "Bogus", "-H", "127.0.0.1", "-P", &port.to_string()])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("element not found"));
}

#[test]
fn test_unreachable_daemon_exits_with_connection_code() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    ebuswatch_cmd()
        .args(["info", "-H", "127.0.0.1", "-P", &port.to_string()])
        .assert()
        .code(7);
}
