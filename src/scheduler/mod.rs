//! Scheduler module: the reconciliation engine and the loop that drives it.
//!
//! One run loads the persisted state, probes every target, feeds each
//! outcome through the incident state machine and latency retention, fires
//! hooks and notifications, and finally decides whether to write back.

mod dispatcher;
mod incident;
mod latency;
mod persistence;
mod policy;
mod registry;

pub use dispatcher::*;
pub use incident::*;
pub use latency::*;
pub use persistence::*;
pub use policy::*;
pub use registry::*;

use crate::config::{ConfigError, WorkerConfig};
use crate::db::{load_state, save_state, DbError, KvStore, LatencySample, MonitorState, MonitorTarget};
use crate::discovery::Discovery;
use crate::notify::{format_status_change_notification, LoggingNotifier, NotificationSender, Notifier};
use crate::probe::{Prober, RemoteChecker};

use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Reconciliation error types.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to persist state: {0}")]
    Store(#[from] DbError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Everything a run needs from its surroundings.
#[derive(Clone)]
pub struct ReconcileContext {
    pub config: Arc<WorkerConfig>,
    pub store: Arc<dyn KvStore>,
    /// Name of this check location.
    pub location: String,
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub targets: usize,
    pub up: u32,
    pub down: u32,
    pub status_changed: bool,
    pub persisted: bool,
}

/// The reconciliation engine.
pub struct Reconciler {
    ctx: ReconcileContext,
    dispatcher: ProbeDispatcher,
    discovery: Option<Arc<dyn Discovery>>,
    notifier: Arc<dyn Notifier>,
    sender: Option<Arc<dyn NotificationSender>>,
    tz: FixedOffset,
}

impl Reconciler {
    pub fn new(
        ctx: ReconcileContext,
        prober: Arc<dyn Prober>,
        remote: RemoteChecker,
    ) -> Result<Self, ReconcileError> {
        ctx.config.validate()?;
        let tz = ctx.config.time_zone()?;
        let dispatcher = ProbeDispatcher::new(prober, remote, &ctx.location, ctx.config.concurrency);

        Ok(Self {
            ctx,
            dispatcher,
            discovery: None,
            notifier: Arc::new(LoggingNotifier),
            sender: None,
            tz,
        })
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Run one reconciliation now.
    pub async fn run(&self) -> Result<RunReport, ReconcileError> {
        self.run_at(Utc::now().timestamp()).await
    }

    /// Run one reconciliation that starts at `now` (Unix seconds).
    ///
    /// Each target is stamped with `now` plus the time its probe took to
    /// finish; the cooldown decision and `last_update` use `now`.
    pub async fn run_at(&self, now: i64) -> Result<RunReport, ReconcileError> {
        tracing::info!("Running reconciliation at {} from {}", now, self.ctx.location);

        let mut state = load_state(self.ctx.store.as_ref());
        state.overall_up = 0;
        state.overall_down = 0;

        let set = assemble_targets(&self.ctx.config.monitors, self.discovery.as_deref()).await;
        prune_incidents(&mut state, &set);

        let mut report = RunReport {
            targets: set.targets.len(),
            ..Default::default()
        };

        let mut outcomes = self.dispatcher.dispatch(set.targets);
        while let Some(outcome) = outcomes.recv().await {
            let observed = now + outcome.elapsed.as_secs() as i64;
            if self.process_outcome(&mut state, outcome, observed).await {
                report.status_changed = true;
            }
        }

        report.up = state.overall_up;
        report.down = state.overall_down;

        tracing::info!(
            "Status changed: {}, last update: {}, current time: {}",
            report.status_changed,
            state.last_update,
            now
        );

        if should_persist(
            report.status_changed,
            state.last_update,
            now,
            self.ctx.config.kv_write_cooldown_minutes,
        ) {
            state.last_update = now;
            save_state(self.ctx.store.as_ref(), &state)?;
            report.persisted = true;
            tracing::info!("State updated ({} up, {} down)", report.up, report.down);
        } else {
            tracing::info!("Skipping state update due to cooldown period");
        }

        Ok(report)
    }

    /// Fold one probe outcome into the state. Returns whether the status changed.
    async fn process_outcome(&self, state: &mut MonitorState, outcome: ProbeOutcome, now: i64) -> bool {
        let ProbeOutcome {
            target,
            location,
            status,
            ..
        } = outcome;

        if status.ok {
            state.overall_up += 1;
        } else {
            state.overall_down += 1;
        }

        // All state mutation for this target happens before the first await.
        let incidents = state.incidents.entry(target.id.clone()).or_default();
        let transition = apply_observation(incidents, status.ok, &status.error, now);
        enforce_incident_retention(incidents, now);

        record_latency(
            state.latency.entry(target.id.clone()).or_default(),
            LatencySample {
                location,
                latency_ms: status.latency_ms,
                time: now,
            },
        );

        let reason = if status.ok { "OK" } else { status.error.as_str() };
        self.fire_hooks(&target, &transition, now, reason).await;

        transition.is_status_change()
    }

    async fn fire_hooks(&self, target: &MonitorTarget, transition: &Transition, now: i64, reason: &str) {
        let started = match transition.incident_start() {
            Some(started) => started,
            None => return,
        };
        let grace = self.ctx.config.grace_period();

        if should_notify(grace, transition, now) {
            self.send_notification(target, transition.is_up(), started, now, reason)
                .await;
        } else {
            tracing::debug!(
                "Grace period ({:?}m) not met for {} (incident age {}s, changed {}), skipping notification",
                grace,
                target.name,
                now - started,
                transition.is_status_change()
            );
        }

        if transition.is_status_change() {
            if let Err(e) = self
                .notifier
                .on_status_change(target, transition.is_up(), started, now, reason)
                .await
            {
                tracing::warn!("Status change hook failed for {}: {}", target.name, e);
            }
        }

        if !transition.is_up() {
            if let Err(e) = self
                .notifier
                .on_incident_ongoing(target, started, now, reason)
                .await
            {
                tracing::warn!("Ongoing incident hook failed for {}: {}", target.name, e);
            }
        }
    }

    async fn send_notification(&self, target: &MonitorTarget, is_up: bool, started: i64, now: i64, reason: &str) {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => {
                tracing::debug!("Notification transport not configured, skipping notification for {}", target.name);
                return;
            }
        };

        let (title, body) =
            format_status_change_notification(target, is_up, started, now, reason, &self.tz);
        if let Err(e) = sender.send(&title, &body).await {
            tracing::warn!("Failed to send notification for {}: {}", target.name, e);
        }
    }
}

/// Drives reconciliation runs on a fixed interval.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the background run loop.
    pub async fn start(&self) {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        let mut rx = tx.subscribe();
        *self.stop.lock().await = Some(tx);

        let reconciler = self.reconciler.clone();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Starting scheduler, running every {:?}", self.interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconciler.run().await {
                            tracing::error!("Reconciliation run failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the run loop after the current run.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}
