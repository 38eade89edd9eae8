use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shopilent_core::{EventBus, EventEnvelope, OutboxMessage, Result};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::OutboxStore;

/// Upper bound on back-to-back batches in one tick, so shutdown stays responsive.
const MAX_BATCHES_PER_TICK: usize = 20;

/// Floors applied by [`OutboxWorker::with_config`]; a zero tick period panics in tokio.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MIN_LEASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// How long a claim stays exclusive before another worker may take over.
    pub lease: Duration,
    pub retry: RetryPolicy,
    /// Processed messages older than this are deleted by the sweep.
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            lease: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            retention: Duration::from_secs(7 * 24 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// Outcome of delivering one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Processed,
    Retried {
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
    },
    Failed {
        retry_count: i32,
    },
    /// The lease expired and another worker claimed the message first.
    LeaseLost,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub claimed: usize,
    pub processed: usize,
    pub retried: usize,
    pub failed: usize,
    pub lease_lost: usize,
}

impl DrainReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Processed => self.processed += 1,
            Delivery::Retried { .. } => self.retried += 1,
            Delivery::Failed { .. } => self.failed += 1,
            Delivery::LeaseLost => self.lease_lost += 1,
        }
    }

    fn merge(&mut self, other: DrainReport) {
        self.claimed += other.claimed;
        self.processed += other.processed;
        self.retried += other.retried;
        self.failed += other.failed;
        self.lease_lost += other.lease_lost;
    }
}

/// Background drain of the outbox into the event bus.
pub struct OutboxWorker {
    store: Arc<dyn OutboxStore>,
    bus: Arc<EventBus>,
    config: OutboxConfig,
    worker_id: String,
}

impl OutboxWorker {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            config: OutboxConfig::default(),
            worker_id: format!("outbox-{}-{}", std::process::id(), Uuid::new_v4().simple()),
        }
    }

    /// Replace the configuration. Zero durations and batch sizes are raised
    /// to the smallest usable value.
    pub fn with_config(mut self, config: OutboxConfig) -> Self {
        self.config = OutboxConfig {
            poll_interval: config.poll_interval.max(MIN_POLL_INTERVAL),
            batch_size: config.batch_size.max(1),
            lease: config.lease.max(MIN_LEASE),
            sweep_interval: config.sweep_interval.max(MIN_POLL_INTERVAL),
            ..config
        };
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Dispatch one claimed message and record the result.
    pub async fn process_message(&self, message: &OutboxMessage) -> Result<Delivery> {
        let envelope = EventEnvelope::from(message);
        let now = Utc::now();

        match self.bus.publish(&envelope).await {
            Ok(handlers) => {
                if !self.store.mark_processed(message.id, &self.worker_id, now).await? {
                    return Ok(self.lease_lost(message));
                }
                debug!(
                    message_id = %message.id,
                    event_type = %message.event_type,
                    handlers,
                    "outbox message processed"
                );
                Ok(Delivery::Processed)
            }
            Err(err) => {
                let error_text = err.to_string();
                let retry_count = message.retry_count + 1;
                match self.config.retry.decide(retry_count) {
                    RetryDecision::RetryAfter(delay) => {
                        let next_attempt_at = after(now, delay);
                        let held = self
                            .store
                            .mark_retry(message.id, &self.worker_id, &error_text, retry_count, next_attempt_at)
                            .await?;
                        if !held {
                            return Ok(self.lease_lost(message));
                        }
                        warn!(
                            message_id = %message.id,
                            event_type = %message.event_type,
                            retry_count,
                            next_attempt_at = %next_attempt_at,
                            error = %error_text,
                            "outbox dispatch failed, will retry"
                        );
                        Ok(Delivery::Retried {
                            retry_count,
                            next_attempt_at,
                        })
                    }
                    RetryDecision::GiveUp => {
                        let held = self
                            .store
                            .mark_failed(message.id, &self.worker_id, &error_text, retry_count, now)
                            .await?;
                        if !held {
                            return Ok(self.lease_lost(message));
                        }
                        error!(
                            message_id = %message.id,
                            event_type = %message.event_type,
                            retry_count,
                            error = %error_text,
                            "outbox message permanently failed, operator intervention required"
                        );
                        Ok(Delivery::Failed { retry_count })
                    }
                }
            }
        }
    }

    fn lease_lost(&self, message: &OutboxMessage) -> Delivery {
        warn!(
            message_id = %message.id,
            event_type = %message.event_type,
            worker_id = %self.worker_id,
            "outbox lease lost before completion, result discarded"
        );
        Delivery::LeaseLost
    }

    /// Claim one batch and deliver it.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn drain_once(&self) -> Result<DrainReport> {
        let messages = self
            .store
            .claim_due(
                &self.worker_id,
                self.config.batch_size,
                self.config.lease,
                Utc::now(),
            )
            .await?;

        let mut report = DrainReport {
            claimed: messages.len(),
            ..Default::default()
        };
        for message in &messages {
            report.record(self.process_message(message).await?);
        }
        Ok(report)
    }

    /// Drain batches until one comes back short.
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut total = DrainReport::default();
        for _ in 0..MAX_BATCHES_PER_TICK {
            let report = self.drain_once().await?;
            total.merge(report);
            if report.claimed < self.config.batch_size {
                break;
            }
        }
        Ok(total)
    }

    /// Delete processed messages past the retention window.
    pub async fn sweep_retention(&self) -> Result<u64> {
        let cutoff = before(Utc::now(), self.config.retention);
        let purged = self.store.purge_processed(cutoff).await?;
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "outbox retention sweep");
        }
        Ok(purged)
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_retries = self.config.retry.max_retries,
            "outbox worker started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sweep = Instant::now();

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            match self.drain().await {
                Ok(report) if report.claimed > 0 => info!(
                    claimed = report.claimed,
                    processed = report.processed,
                    retried = report.retried,
                    failed = report.failed,
                    lease_lost = report.lease_lost,
                    "outbox drained"
                ),
                Ok(_) => {}
                Err(err) => error!(error = %err, "outbox drain failed"),
            }

            if last_sweep.elapsed() >= self.config.sweep_interval {
                if let Err(err) = self.sweep_retention().await {
                    error!(error = %err, "outbox retention sweep failed");
                }
                last_sweep = Instant::now();
            }
        }

        info!(worker_id = %self.worker_id, "outbox worker stopped");
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn before(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
