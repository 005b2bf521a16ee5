//! Per-target incident state machine and incident retention.

use crate::db::Incident;

/// How long closed incidents are kept, in seconds.
pub const INCIDENT_RETENTION_SECS: i64 = 90 * 24 * 60 * 60;

/// Result of feeding one probe observation into a target's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Up before and up now.
    StayedUp,
    /// The open incident that started at `started` was closed.
    Recovered { started: i64 },
    /// A new incident was opened.
    Opened { started: i64 },
    /// The open incident continues with a different error.
    CauseChanged { started: i64 },
    /// The open incident continues with the same error.
    StillDown { started: i64 },
}

impl Transition {
    pub fn is_status_change(&self) -> bool {
        matches!(
            self,
            Transition::Recovered { .. } | Transition::Opened { .. } | Transition::CauseChanged { .. }
        )
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Transition::StayedUp | Transition::Recovered { .. })
    }

    /// Start of the incident this transition concerns, if any.
    pub fn incident_start(&self) -> Option<i64> {
        match *self {
            Transition::StayedUp => None,
            Transition::Recovered { started }
            | Transition::Opened { started }
            | Transition::CauseChanged { started }
            | Transition::StillDown { started } => Some(started),
        }
    }
}

/// Apply a probe observation at `now` to a target's incident sequence.
pub fn apply_observation(incidents: &mut Vec<Incident>, ok: bool, error: &str, now: i64) -> Transition {
    if incidents.is_empty() {
        incidents.push(Incident::sentinel(now));
    }

    let last_index = incidents.len() - 1;
    let last = &mut incidents[last_index];

    match (ok, last.is_open()) {
        (true, true) => {
            last.end = Some(now);
            Transition::Recovered {
                started: last.started(),
            }
        }
        (true, false) => Transition::StayedUp,
        (false, false) => {
            incidents.push(Incident::open(now, error));
            Transition::Opened { started: now }
        }
        (false, true) => {
            if last.last_error() != Some(error) {
                last.starts.push(now);
                last.errors.push(error.to_string());
                Transition::CauseChanged {
                    started: last.started(),
                }
            } else {
                Transition::StillDown {
                    started: last.started(),
                }
            }
        }
    }
}

/// Expire closed incidents older than the retention window.
///
/// Afterwards the sequence always begins with a sentinel unless its first
/// entry already predates the window.
pub fn enforce_incident_retention(incidents: &mut Vec<Incident>, now: i64) {
    let cutoff = now - INCIDENT_RETENTION_SECS;

    let expired = incidents
        .iter()
        .take_while(|i| matches!(i.end, Some(end) if end < cutoff))
        .count();
    incidents.drain(..expired);

    let needs_sentinel = match incidents.first() {
        None => true,
        Some(first) => first.started() > cutoff && !first.is_sentinel(),
    };
    if needs_sentinel {
        incidents.insert(0, Incident::sentinel(cutoff));
    }
}
