//! Probe module.
//!
//! Probes run either locally over HTTP or are delegated to a remote check
//! location. Either way the engine only ever sees a [`ProbeStatus`].

mod http;
mod remote;

pub use http::*;
pub use remote::*;

use crate::db::{deserialize_latency_ms, MonitorTarget};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Timeout after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("{0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("Expected codes: {expected}, Got: {got}")]
    UnexpectedStatus { expected: String, got: u16 },
}

/// Outcome of probing one target once.
///
/// Serialized with the field names used by remote check locations; the
/// longer spellings are accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeStatus {
    #[serde(
        rename = "ping",
        alias = "latencyMs",
        default,
        deserialize_with = "deserialize_latency_ms"
    )]
    pub latency_ms: u64,
    #[serde(rename = "up", alias = "ok")]
    pub ok: bool,
    #[serde(rename = "err", alias = "error", default)]
    pub error: String,
}

impl ProbeStatus {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            latency_ms,
            ok: true,
            error: String::new(),
        }
    }

    pub fn down(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            latency_ms,
            ok: false,
            error: error.into(),
        }
    }
}

impl From<Result<u64, ProbeError>> for ProbeStatus {
    fn from(result: Result<u64, ProbeError>) -> Self {
        match result {
            Ok(latency) => ProbeStatus::up(latency),
            Err(e) => ProbeStatus::down(0, e.to_string()),
        }
    }
}

/// Something that can probe a target from the current location.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &MonitorTarget) -> ProbeStatus;
}
