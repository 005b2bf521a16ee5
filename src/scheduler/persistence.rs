//! Write-back decision for the aggregate state.

/// Clock drift tolerated when comparing against the cooldown, in seconds.
pub const COOLDOWN_SLACK_SECS: i64 = 10;

/// Whether the mutated state should be written back at `now`.
///
/// Status changes are always written; otherwise writes are spaced at
/// least `cooldown_minutes` apart.
pub fn should_persist(status_changed: bool, last_update: i64, now: i64, cooldown_minutes: u32) -> bool {
    status_changed || now - last_update >= i64::from(cooldown_minutes) * 60 - COOLDOWN_SLACK_SECS
}
