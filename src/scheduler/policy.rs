//! Grace-period gating of outbound notifications.

use super::incident::Transition;

/// Scheduler jitter tolerated around grace-period boundaries, in seconds.
pub const GRACE_SLACK_SECS: i64 = 30;

/// Decide whether `transition`, observed at `now`, should be announced.
///
/// `grace_minutes` of `None` announces every status change immediately.
/// With a grace period, down notices fire once as the incident ages past
/// the grace period, and up notices only follow incidents old enough to
/// have had their down notice sent.
pub fn should_notify(grace_minutes: Option<u32>, transition: &Transition, now: i64) -> bool {
    let started = match transition.incident_start() {
        Some(started) => started,
        None => return false,
    };
    let age = now - started;

    let grace = match grace_minutes {
        Some(g) => i64::from(g),
        None => return transition.is_status_change(),
    };
    let announced = age >= (grace + 1) * 60 - GRACE_SLACK_SECS;

    match transition {
        Transition::StayedUp => false,
        Transition::Recovered { .. } => announced,
        Transition::Opened { .. } | Transition::CauseChanged { .. } | Transition::StillDown { .. } => {
            let crossing = age >= grace * 60 - GRACE_SLACK_SECS && age < grace * 60 + GRACE_SLACK_SECS;
            (transition.is_status_change() && announced) || crossing
        }
    }
}
