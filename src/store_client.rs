use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::alarm::model::{AlarmConfig, WriteAck};

pub const DEFAULT_READ_URL: &str = "http://127.0.0.1:8098/alarm";
pub const DEFAULT_WRITE_URL: &str = "http://127.0.0.1:8098/alarm";

/// Every way a store request can fail. Callers treat all variants alike; the
/// detail only ends up in logs.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum FetchFailure {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed response from {url}: {message}")]
    Malformed { url: String, message: String },
    #[error("alarm store at {url} rejected the update")]
    Rejected { url: String },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Endpoints {
    pub read_url: String,
    pub write_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            read_url: DEFAULT_READ_URL.to_string(),
            write_url: DEFAULT_WRITE_URL.to_string(),
        }
    }
}

/// Blocking access to the remote alarm store. Each call is exactly one request.
pub trait AlarmStore: Send + Sync {
    fn read_config(&self) -> Result<AlarmConfig, FetchFailure>;
    fn write_config(&self, config: &AlarmConfig) -> Result<WriteAck, FetchFailure>;
}

pub struct HttpAlarmStore {
    agent: ureq::Agent,
    endpoints: Endpoints,
}

impl HttpAlarmStore {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            endpoints,
        }
    }
}

impl AlarmStore for HttpAlarmStore {
    fn read_config(&self) -> Result<AlarmConfig, FetchFailure> {
        let url = &self.endpoints.read_url;
        log::debug!("GET {url}");
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| request_failure(url, err))?;
        decode_json(url, response)
    }

    fn write_config(&self, config: &AlarmConfig) -> Result<WriteAck, FetchFailure> {
        let url = &self.endpoints.write_url;
        let body = serde_json::to_string(config).map_err(|err| FetchFailure::Malformed {
            url: url.clone(),
            message: format!("could not encode request: {err}"),
        })?;
        log::debug!("POST {url} {body}");
        let response = self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|err| request_failure(url, err))?;
        let ack: WriteAck = decode_json(url, response)?;
        if !ack.success {
            return Err(FetchFailure::Rejected { url: url.clone() });
        }
        Ok(ack)
    }
}

fn request_failure(url: &str, err: ureq::Error) -> FetchFailure {
    match err {
        ureq::Error::Status(status, _) => FetchFailure::Status {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => FetchFailure::Transport {
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

fn decode_json<T: DeserializeOwned>(
    url: &str,
    response: ureq::Response,
) -> Result<T, FetchFailure> {
    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(FetchFailure::Status {
            url: url.to_string(),
            status,
        });
    }
    let body = response
        .into_string()
        .map_err(|err| FetchFailure::Malformed {
            url: url.to_string(),
            message: err.to_string(),
        })?;
    log::debug!("{url} -> {body}");
    serde_json::from_str(&body).map_err(|err| FetchFailure::Malformed {
        url: url.to_string(),
        message: err.to_string(),
    })
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StoreEvent {
    Fetched(Result<AlarmConfig, FetchFailure>),
    Saved {
        config: AlarmConfig,
        outcome: Result<WriteAck, FetchFailure>,
    },
}

/// Non-blocking front of an [`AlarmStore`]: every call runs on its own worker
/// thread and reports back through the event channel. Nothing is cancelled,
/// batched or retried.
pub struct AlarmStoreClient {
    store: Arc<dyn AlarmStore>,
    events: Sender<StoreEvent>,
}

impl AlarmStoreClient {
    pub fn new(store: Arc<dyn AlarmStore>, events: Sender<StoreEvent>) -> Self {
        Self { store, events }
    }

    pub fn read_config(&self) {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        thread::spawn(move || {
            let outcome = store.read_config();
            let _ = events.send(StoreEvent::Fetched(outcome));
        });
    }

    pub fn write_config(&self, config: AlarmConfig) {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        thread::spawn(move || {
            let outcome = store.write_config(&config);
            let _ = events.send(StoreEvent::Saved { config, outcome });
        });
    }
}
