use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::alarm::model::{AlarmConfig, load_stored_alarm, save_stored_alarm};

pub const ALARM_PATH: &str = "/alarm";

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub store_path: PathBuf,
}

/// HTTP front of the remote alarm store. Stops and joins its worker on drop.
pub struct ApiServer {
    pub local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn start(config: ApiServerConfig) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start alarm store on {bind}: {err}"))?;
        let local_addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| anyhow::anyhow!("alarm store on {bind} is not bound to an IP address"))?;
        let store_path = config.store_path;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let http_join =
            thread::spawn(move || run_server_loop(server, store_path, stop_for_thread));

        log::info!("alarm store listening on http://{local_addr}{ALARM_PATH}");
        Ok(Self {
            local_addr,
            stop,
            http_join: Some(http_join),
        })
    }

    /// Blocks the calling thread until the server loop exits.
    pub fn wait(mut self) {
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn run_server_loop(server: Server, store_path: PathBuf, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &store_path),
            Ok(None) => continue,
            Err(_) => continue,
        }
    }
}

#[derive(Debug, Serialize)]
struct WriteResponse {
    #[serde(flatten)]
    alarm: AlarmConfig,
    success: bool,
}

fn handle_request(mut request: tiny_http::Request, store_path: &Path) {
    let url = request.url().to_string();
    let path = url.split_once('?').map(|(path, _)| path).unwrap_or(&url);
    if path != ALARM_PATH {
        let _ = send_error(request, StatusCode(404), "not found");
        return;
    }

    let current = load_stored_alarm(store_path);
    let method = request.method().clone();
    match method {
        Method::Get => {
            let _ = send_json(request, StatusCode(200), &current);
        }
        Method::Post => {
            let mut body = String::new();
            let parsed = request
                .as_reader()
                .read_to_string(&mut body)
                .ok()
                .and_then(|_| serde_json::from_str::<Value>(&body).ok());
            let Some(update) = parsed else {
                log::warn!("rejected alarm update: body is not JSON");
                let _ = send_json(request, StatusCode(200), &rejected(current));
                return;
            };

            let payload = match apply_update(current, &update) {
                Ok(merged) => match save_stored_alarm(store_path, &merged) {
                    Ok(()) => {
                        log::info!(
                            "alarm updated: time={} active={}",
                            merged.trigger_epoch_seconds,
                            merged.active
                        );
                        WriteResponse {
                            alarm: merged,
                            success: true,
                        }
                    }
                    Err(err) => {
                        log::error!("{err:#}");
                        rejected(current)
                    }
                },
                Err(reason) => {
                    log::warn!("rejected alarm update: {reason}");
                    rejected(current)
                }
            };
            let _ = send_json(request, StatusCode(200), &payload);
        }
        _ => {
            let _ = send_error(request, StatusCode(405), "method not allowed");
        }
    }
}

fn rejected(alarm: AlarmConfig) -> WriteResponse {
    WriteResponse {
        alarm,
        success: false,
    }
}

/// Merges the recognised fields of `update` into `current`. Absent fields keep
/// their stored value; a present but invalid field rejects the whole update.
fn apply_update(current: AlarmConfig, update: &Value) -> Result<AlarmConfig, String> {
    let Some(fields) = update.as_object() else {
        return Err("body is not a JSON object".to_string());
    };

    let mut merged = current;
    if let Some(time) = fields.get("time") {
        merged.trigger_epoch_seconds = parse_unix_timestamp(time)
            .ok_or_else(|| format!("time {time} is not a ten-digit unix timestamp"))?;
    }
    if let Some(active) = fields.get("active") {
        merged.active = active
            .as_bool()
            .ok_or_else(|| format!("active {active} is not a boolean"))?;
    }
    Ok(merged)
}

fn parse_unix_timestamp(value: &Value) -> Option<u64> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        _ => return None,
    };
    if text.len() != 10 || !text.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn send_json<T: Serialize>(
    request: tiny_http::Request,
    status: StatusCode,
    body: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn send_error(request: tiny_http::Request, status: StatusCode, message: &str) -> Result<()> {
    #[derive(Serialize)]
    struct ErrorResponse<'a> {
        error: &'a str,
    }

    send_json(request, status, &ErrorResponse { error: message })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn update_merges_present_fields_only() {
        let current = AlarmConfig {
            trigger_epoch_seconds: 1_700_000_000,
            active: false,
        };
        let merged = apply_update(current, &json!({ "active": true })).expect("valid");
        assert_eq!(merged.trigger_epoch_seconds, 1_700_000_000);
        assert!(merged.active);

        let merged = apply_update(current, &json!({ "time": 1_704_180_600_u64 })).expect("valid");
        assert_eq!(merged.trigger_epoch_seconds, 1_704_180_600);
        assert!(!merged.active);
    }

    #[test]
    fn update_accepts_timestamp_as_string() {
        let merged = apply_update(AlarmConfig::default(), &json!({ "time": "1704180600" }))
            .expect("string timestamp");
        assert_eq!(merged.trigger_epoch_seconds, 1_704_180_600);
    }

    #[test]
    fn update_rejects_invalid_fields() {
        let current = AlarmConfig::default();
        assert!(apply_update(current, &json!({ "time": 12_345 })).is_err());
        assert!(apply_update(current, &json!({ "time": 1_704_180_600.5 })).is_err());
        assert!(apply_update(current, &json!({ "time": true })).is_err());
        assert!(apply_update(current, &json!({ "active": "yes" })).is_err());
        assert!(apply_update(current, &json!([1, 2])).is_err());
    }

    #[test]
    fn write_response_carries_alarm_and_success_flag() {
        let payload = serde_json::to_value(WriteResponse {
            alarm: AlarmConfig::armed_at(1_704_180_600),
            success: true,
        })
        .expect("encode");
        assert_eq!(
            payload,
            json!({ "time": 1_704_180_600_u64, "active": true, "success": true })
        );
    }

    #[test]
    fn server_persists_accepted_updates() {
        let dir = tempdir().expect("tempdir");
        let store_path = dir.path().join("alarm.json");
        let server = ApiServer::start(ApiServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            store_path: store_path.clone(),
        })
        .expect("server should start");
        let url = format!("http://{}{ALARM_PATH}", server.local_addr);

        let body = ureq::post(&url)
            .set("Content-Type", "application/json")
            .send_string(r#"{"time": 1704180600, "active": true}"#)
            .expect("post")
            .into_string()
            .expect("body");
        let reply: Value = serde_json::from_str(&body).expect("json reply");
        assert_eq!(reply["success"], true);

        drop(server);
        assert_eq!(
            load_stored_alarm(&store_path),
            AlarmConfig::armed_at(1_704_180_600)
        );
    }

    #[test]
    fn server_reports_rejection_with_current_state() {
        let dir = tempdir().expect("tempdir");
        let server = ApiServer::start(ApiServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            store_path: dir.path().join("alarm.json"),
        })
        .expect("server should start");
        let url = format!("http://{}{ALARM_PATH}", server.local_addr);

        let body = ureq::post(&url)
            .set("Content-Type", "application/json")
            .send_string("{ not-json")
            .expect("post")
            .into_string()
            .expect("body");
        let reply: Value = serde_json::from_str(&body).expect("json reply");
        assert_eq!(
            reply,
            json!({ "time": 0, "active": false, "success": false })
        );
    }

    #[test]
    fn other_methods_are_not_allowed() {
        let dir = tempdir().expect("tempdir");
        let server = ApiServer::start(ApiServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            store_path: dir.path().join("alarm.json"),
        })
        .expect("server should start");
        let url = format!("http://{}{ALARM_PATH}", server.local_addr);

        match ureq::delete(&url).call() {
            Err(ureq::Error::Status(status, _)) => assert_eq!(status, 405),
            other => panic!("expected 405, got {other:?}"),
        }
    }
}
