use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

struct StoreProcess {
    child: Child,
    url: String,
}

impl Drop for StoreProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

fn spawn_store(store: &Path) -> StoreProcess {
    let port = free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_alarm-remote"))
        .arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--store")
        .arg(store)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn store");
    let process = StoreProcess {
        child,
        url: format!("http://127.0.0.1:{port}/alarm"),
    };

    for _ in 0..200 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return process;
        }
        thread::sleep(Duration::from_millis(25));
    }
    panic!("alarm store did not become reachable on port {port}");
}

#[test]
fn show_fails_when_store_is_unreachable() {
    let url = format!("http://127.0.0.1:{}/alarm", free_port());

    let mut cmd = cargo_bin_cmd!("alarm-remote");
    cmd.arg("show")
        .arg("--read-url")
        .arg(&url)
        .arg("--write-url")
        .arg(&url)
        .assert()
        .failure()
        .stdout(predicate::str::contains("status:  error"))
        .stdout(predicate::str::contains("active:  off"))
        .stderr(predicate::str::contains("alarm store reported an error"));
}

#[test]
fn rejects_invalid_wait_duration() {
    let mut cmd = cargo_bin_cmd!("alarm-remote");
    cmd.arg("show")
        .arg("--wait")
        .arg("0s")
        .assert()
        .failure()
        .stderr(predicate::str::contains("duration must be > 0"));
}

#[test]
fn set_then_show_round_trips_through_store() {
    let dir = tempdir().expect("tempdir");
    let store_file = dir.path().join("alarm.json");
    let store = spawn_store(&store_file);

    let mut set = cargo_bin_cmd!("alarm-remote");
    set.arg("set")
        .arg("07:30")
        .arg("--read-url")
        .arg(&store.url)
        .arg("--write-url")
        .arg(&store.url)
        .assert()
        .success()
        .stdout(predicate::str::contains("time:    07:30"))
        .stdout(predicate::str::contains("active:  on"))
        .stdout(predicate::str::contains("status").not());

    let mut show = cargo_bin_cmd!("alarm-remote");
    show.arg("show")
        .arg("--read-url")
        .arg(&store.url)
        .arg("--write-url")
        .arg(&store.url)
        .assert()
        .success()
        .stdout(predicate::str::contains("time:    07:30:00"))
        .stdout(predicate::str::contains("active:  on"));

    let persisted = fs::read_to_string(&store_file).expect("store file");
    let persisted: serde_json::Value = serde_json::from_str(&persisted).expect("json");
    assert_eq!(persisted["active"], true);
}

#[test]
fn toggle_flips_stored_active_flag() {
    let dir = tempdir().expect("tempdir");
    let store_file = dir.path().join("alarm.json");
    fs::write(&store_file, r#"{"time": 1704180600, "active": true}"#).expect("seed store");
    let store = spawn_store(&store_file);

    let mut toggle = cargo_bin_cmd!("alarm-remote");
    toggle
        .arg("toggle")
        .arg("--read-url")
        .arg(&store.url)
        .arg("--write-url")
        .arg(&store.url)
        .assert()
        .success()
        .stdout(predicate::str::contains("active:  off"));

    let persisted = fs::read_to_string(&store_file).expect("store file");
    let persisted: serde_json::Value = serde_json::from_str(&persisted).expect("json");
    assert_eq!(persisted["time"], 1_704_180_600_u64);
    assert_eq!(persisted["active"], false);
}

#[test]
fn due_reports_disarmed_alarm() {
    let dir = tempdir().expect("tempdir");
    let store_file = dir.path().join("alarm.json");
    let store = spawn_store(&store_file);

    let mut due = cargo_bin_cmd!("alarm-remote");
    due.arg("due")
        .arg("--read-url")
        .arg(&store.url)
        .assert()
        .success()
        .stdout(predicate::str::contains("due: no (alarm disarmed)"));
}
