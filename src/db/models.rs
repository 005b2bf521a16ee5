//! Persisted state and target model types.
//!
//! Field names on the wire follow the JSON record that status pages already
//! read from the `state` key, so the Rust names and the serialized names
//! differ in a few places.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Schema version written into every persisted state record.
pub const STATE_VERSION: u32 = 1;

/// Error text marking a sentinel incident.
pub const SENTINEL_ERROR: &str = "dummy";

/// A monitoring target, either statically configured or discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTarget {
    pub id: String,
    pub name: String,
    /// URL probed by the HTTP prober.
    pub target: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Accepted status codes. When unset any 2xx counts as up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_codes: Option<Vec<u16>>,
    /// Probe timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Remote check location that should run the probe instead of us.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_location_worker_route: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl MonitorTarget {
    /// Build a plain GET target, as produced by discovery.
    pub fn new(id: &str, name: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            target: target.to_string(),
            method: default_method(),
            expected_codes: None,
            timeout: None,
            headers: None,
            check_location_worker_route: None,
        }
    }
}

/// The single aggregate persisted under the `state` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorState {
    pub version: u32,
    /// Unix seconds of the last successful write.
    pub last_update: i64,
    pub overall_up: u32,
    pub overall_down: u32,
    #[serde(rename = "incident", default)]
    pub incidents: BTreeMap<String, Vec<Incident>>,
    #[serde(default)]
    pub latency: BTreeMap<String, LatencyHistory>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            last_update: 0,
            overall_up: 0,
            overall_down: 0,
            incidents: BTreeMap::new(),
            latency: BTreeMap::new(),
        }
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

/// A span of down-ness for one target.
///
/// `starts` and `errors` are parallel: every change of cause while the
/// incident is open appends one entry to each. `end` is `None` while open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    #[serde(rename = "start")]
    pub starts: Vec<i64>,
    #[serde(rename = "error")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl Incident {
    /// Open a new incident at `time`.
    pub fn open(time: i64, error: &str) -> Self {
        Self {
            starts: vec![time],
            errors: vec![error.to_string()],
            end: None,
        }
    }

    /// A closed bookkeeping entry recording that monitoring ran since `time`.
    pub fn sentinel(time: i64) -> Self {
        Self {
            starts: vec![time],
            errors: vec![SENTINEL_ERROR.to_string()],
            end: Some(time),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn is_sentinel(&self) -> bool {
        self.errors.first().map(String::as_str) == Some(SENTINEL_ERROR)
    }

    /// Time the incident first started.
    pub fn started(&self) -> i64 {
        self.starts.first().copied().unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(String::as_str)
    }
}

/// Latency samples kept at two resolutions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyHistory {
    /// Every sample from the last 12 hours.
    pub recent: Vec<LatencySample>,
    /// At most one sample per rolling hour for the last 90 days.
    pub all: Vec<LatencySample>,
}

/// A single probe latency observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    #[serde(rename = "loc")]
    pub location: String,
    #[serde(rename = "ping", deserialize_with = "deserialize_latency_ms")]
    pub latency_ms: u64,
    pub time: i64,
}

/// Read a millisecond latency written as either an integer or a float.
///
/// Fractions are rounded; negative or non-finite values read as zero.
pub fn deserialize_latency_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Whole(u64),
        Fractional(f64),
    }

    Ok(match Millis::deserialize(deserializer)? {
        Millis::Whole(ms) => ms,
        Millis::Fractional(ms) if ms.is_finite() && ms > 0.0 => ms.round() as u64,
        Millis::Fractional(_) => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_names() {
        let mut state = MonitorState::new();
        state.incidents.insert(
            "api".to_string(),
            vec![Incident::sentinel(100), Incident::open(200, "timeout")],
        );
        state.latency.insert(
            "api".to_string(),
            LatencyHistory {
                recent: vec![LatencySample {
                    location: "SYD".to_string(),
                    latency_ms: 42,
                    time: 200,
                }],
                all: vec![],
            },
        );

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["lastUpdate"], 0);
        assert_eq!(json["incident"]["api"][0]["error"][0], "dummy");
        assert_eq!(json["incident"]["api"][0]["end"], 100);
        // Open incidents carry no `end` at all.
        assert!(json["incident"]["api"][1].get("end").is_none());
        assert_eq!(json["latency"]["api"]["recent"][0]["loc"], "SYD");
        assert_eq!(json["latency"]["api"]["recent"][0]["ping"], 42);

        let back: MonitorState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_fractional_latency() {
        let sample: LatencySample =
            serde_json::from_str(r#"{"loc":"FRA","ping":12.5,"time":100}"#).unwrap();
        assert_eq!(sample.latency_ms, 13);

        let sample: LatencySample =
            serde_json::from_str(r#"{"loc":"FRA","ping":-3.2,"time":100}"#).unwrap();
        assert_eq!(sample.latency_ms, 0);

        let sample: LatencySample =
            serde_json::from_str(r#"{"loc":"FRA","ping":40,"time":100}"#).unwrap();
        assert_eq!(sample.latency_ms, 40);
    }

    #[test]
    fn test_target_defaults() {
        let target: MonitorTarget =
            serde_json::from_str(r#"{"id":"a","name":"A","target":"https://a.example/"}"#).unwrap();
        assert_eq!(target.method, "GET");
        assert!(target.expected_codes.is_none());
        assert!(target.check_location_worker_route.is_none());

        let remote: MonitorTarget = serde_json::from_str(
            r#"{"id":"b","name":"B","target":"https://b.example/","method":"HEAD",
                "expectedCodes":[404],"checkLocationWorkerRoute":"https://worker.example/"}"#,
        )
        .unwrap();
        assert_eq!(remote.method, "HEAD");
        assert_eq!(remote.expected_codes, Some(vec![404]));
        assert_eq!(
            remote.check_location_worker_route.as_deref(),
            Some("https://worker.example/")
        );
    }

    #[test]
    fn test_sentinel() {
        let s = Incident::sentinel(500);
        assert!(s.is_sentinel());
        assert!(!s.is_open());
        assert_eq!(s.started(), 500);
        assert!(!Incident::open(1, "boom").is_sentinel());
    }
}
