//! Assembly of the working target set for one run.

use std::collections::HashSet;

use crate::db::{MonitorState, MonitorTarget};
use crate::discovery::Discovery;

/// Targets for one run and whether discovery answered.
#[derive(Debug, Clone)]
pub struct TargetSet {
    pub targets: Vec<MonitorTarget>,
    /// True only when discovery ran and succeeded this run.
    pub authoritative: bool,
}

/// Merge static and discovered targets, keeping the first entry per id.
pub fn merge_targets(
    configured: &[MonitorTarget],
    discovered: Vec<MonitorTarget>,
) -> Vec<MonitorTarget> {
    let mut seen = HashSet::new();
    configured
        .iter()
        .cloned()
        .chain(discovered)
        .filter(|t| seen.insert(t.id.clone()))
        .collect()
}

/// Build the target set, tolerating discovery failure.
pub async fn assemble_targets(
    configured: &[MonitorTarget],
    discovery: Option<&dyn Discovery>,
) -> TargetSet {
    let (discovered, authoritative) = match discovery {
        Some(discovery) => match discovery.discover().await {
            Ok(targets) => {
                tracing::debug!("Discovered {} targets", targets.len());
                (targets, true)
            }
            Err(e) => {
                tracing::warn!("Skipping target discovery: {}", e);
                (Vec::new(), false)
            }
        },
        None => (Vec::new(), false),
    };

    TargetSet {
        targets: merge_targets(configured, discovered),
        authoritative,
    }
}

/// Drop incident history of targets that no longer exist.
///
/// Only valid when `set` is authoritative; otherwise nothing is removed.
pub fn prune_incidents(state: &mut MonitorState, set: &TargetSet) -> usize {
    if !set.authoritative {
        return 0;
    }

    let known: HashSet<&str> = set.targets.iter().map(|t| t.id.as_str()).collect();
    let before = state.incidents.len();
    state.incidents.retain(|id, _| {
        let keep = known.contains(id.as_str());
        if !keep {
            tracing::info!("Removing incident history of vanished target {}", id);
        }
        keep
    });
    before - state.incidents.len()
}
