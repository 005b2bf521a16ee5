//! Bounded-concurrency probe fan-out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::db::MonitorTarget;
use crate::probe::{ProbeStatus, Prober, RemoteChecker};

/// Default number of probes allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// A finished probe, tagged with where it ran.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub target: MonitorTarget,
    pub location: String,
    pub status: ProbeStatus,
    /// Time from the start of the dispatch until this probe finished.
    pub elapsed: Duration,
}

/// Runs probes for a target set with at most `limit` outstanding.
#[derive(Clone)]
pub struct ProbeDispatcher {
    prober: Arc<dyn Prober>,
    remote: RemoteChecker,
    location: String,
    limit: usize,
}

impl ProbeDispatcher {
    pub fn new(prober: Arc<dyn Prober>, remote: RemoteChecker, location: &str, limit: usize) -> Self {
        Self {
            prober,
            remote,
            location: location.to_string(),
            limit: limit.max(1),
        }
    }

    /// Start probing every target and stream outcomes as they complete.
    ///
    /// The receiver yields one outcome per target in completion order and
    /// closes once every probe has finished.
    pub fn dispatch(&self, targets: Vec<MonitorTarget>) -> mpsc::Receiver<ProbeOutcome> {
        let (tx, rx) = mpsc::channel(targets.len().max(1));
        let this = self.clone();
        tokio::spawn(async move {
            this.run(targets, tx).await;
        });
        rx
    }

    async fn run(self, targets: Vec<MonitorTarget>, tx: mpsc::Sender<ProbeOutcome>) {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut tasks = JoinSet::new();
        let started = Instant::now();

        for target in targets {
            // Admission blocks here until a slot frees up.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let this = self.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = this.probe_one(target, started).await;
                drop(permit);

                if tx.send(outcome).await.is_err() {
                    tracing::error!("Dispatcher: result receiver dropped");
                }
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Dispatcher: probe task failed: {}", e);
            }
        }
    }

    async fn probe_one(&self, target: MonitorTarget, started: Instant) -> ProbeOutcome {
        tracing::debug!("[{}] Checking {}...", self.location, target.name);

        let (location, status) = match &target.check_location_worker_route {
            Some(endpoint) => {
                tracing::debug!("Delegating {} to {}", target.name, endpoint);
                self.remote.check(endpoint, &target.id, &self.location).await
            }
            None => (self.location.clone(), self.prober.probe(&target).await),
        };

        ProbeOutcome {
            target,
            location,
            status,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::REMOTE_CHECK_FAILED;
    use async_trait::async_trait;
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProber {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, _target: &MonitorTarget) -> ProbeStatus {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            let delay = rand::thread_rng().gen_range(1..25);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ProbeStatus::up(delay)
        }
    }

    fn targets(n: usize) -> Vec<MonitorTarget> {
        (0..n)
            .map(|i| {
                let id = format!("t{}", i);
                MonitorTarget::new(&id, &id, &format!("https://{}.example/", id))
            })
            .collect()
    }

    async fn drain(mut rx: mpsc::Receiver<ProbeOutcome>) -> Vec<ProbeOutcome> {
        let mut out = Vec::new();
        while let Some(outcome) = rx.recv().await {
            out.push(outcome);
        }
        out
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let prober = Arc::new(CountingProber::default());
        let dispatcher =
            ProbeDispatcher::new(prober.clone(), RemoteChecker::new().unwrap(), "SYD", 6);

        let outcomes = drain(dispatcher.dispatch(targets(20))).await;

        assert_eq!(outcomes.len(), 20);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 20);
        assert!(prober.peak.load(Ordering::SeqCst) <= 6);
        assert_eq!(prober.in_flight.load(Ordering::SeqCst), 0);

        let ids: HashSet<_> = outcomes.iter().map(|o| o.target.id.clone()).collect();
        assert_eq!(ids.len(), 20);
        // Probes sleep at least 1ms, and later admissions wait for earlier ones.
        assert!(outcomes.iter().all(|o| o.elapsed >= Duration::from_millis(1)));
        let slowest = outcomes.iter().map(|o| o.elapsed).max().unwrap();
        assert!(slowest >= Duration::from_millis(3));
        assert!(outcomes.iter().all(|o| o.location == "SYD" && o.status.ok));
    }

    #[tokio::test]
    async fn test_limit_of_one_is_sequential() {
        let prober = Arc::new(CountingProber::default());
        let dispatcher =
            ProbeDispatcher::new(prober.clone(), RemoteChecker::new().unwrap(), "SYD", 1);

        let outcomes = drain(dispatcher.dispatch(targets(5))).await;
        assert_eq!(outcomes.len(), 5);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_target_set() {
        let dispatcher = ProbeDispatcher::new(
            Arc::new(CountingProber::default()),
            RemoteChecker::new().unwrap(),
            "SYD",
            DEFAULT_CONCURRENCY,
        );
        assert!(drain(dispatcher.dispatch(Vec::new())).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delegation_is_down() {
        let prober = Arc::new(CountingProber::default());
        let dispatcher =
            ProbeDispatcher::new(prober.clone(), RemoteChecker::new().unwrap(), "SYD", 2);

        let mut remote = targets(1);
        remote[0].check_location_worker_route = Some("http://127.0.0.1:1/".to_string());

        let outcomes = drain(dispatcher.dispatch(remote)).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].location, "SYD");
        assert!(!outcomes[0].status.ok);
        assert_eq!(outcomes[0].status.error, REMOTE_CHECK_FAILED);
        // The local prober is never consulted for delegated targets.
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }
}
