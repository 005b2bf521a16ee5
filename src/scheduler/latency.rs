//! Dual-resolution latency retention.

use crate::db::{LatencyHistory, LatencySample};

/// How long every sample is kept in `recent`, in seconds.
pub const RECENT_RETENTION_SECS: i64 = 12 * 60 * 60;
/// How long downsampled samples are kept in `all`, in seconds.
pub const ALL_RETENTION_SECS: i64 = 90 * 24 * 60 * 60;
/// Minimum spacing between samples in `all`, in seconds.
pub const DOWNSAMPLE_INTERVAL_SECS: i64 = 60 * 60;

/// Record a sample taken at `sample.time` and expire old ones.
pub fn record_latency(history: &mut LatencyHistory, sample: LatencySample) {
    let now = sample.time;

    let due = match history.all.last() {
        None => true,
        Some(last) => now - last.time > DOWNSAMPLE_INTERVAL_SECS,
    };
    if due {
        history.all.push(sample.clone());
    }
    history.recent.push(sample);

    trim_before(&mut history.recent, now - RECENT_RETENTION_SECS);
    trim_before(&mut history.all, now - ALL_RETENTION_SECS);
}

fn trim_before(samples: &mut Vec<LatencySample>, cutoff: i64) {
    let expired = samples.iter().take_while(|s| s.time < cutoff).count();
    samples.drain(..expired);
}
