//! Consumer worker loop
//!
//! Each consumer runs a pool of handler tasks per process: claims are
//! parallelized across partitions while the broker's in-flight rule keeps
//! any single partition strictly serial. Polling backs off adaptively when
//! the topic is idle and resets as soon as records arrive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use tasklane_core::Topic;

use crate::client::{BusError, Delivery, EventBus};
use crate::retry::{duration_millis, RetryPolicy};

/// How handling of a single delivery failed.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    /// Worth redelivering: network, broker, timeout, busy dependency.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Never worth redelivering: malformed payload, unresolvable target.
    #[error("poison message: {0}")]
    Poison(String),
}

/// A subscriber to one topic within a consumer group.
///
/// `handle` is invoked at least once per record, in partition-key order.
/// Transient errors are redelivered on the worker's retry schedule; poison
/// errors and exhausted retries land in `on_exhausted`, after which the
/// record is acknowledged so it cannot block its partition forever.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Consumer group name, also the idempotency claim scope.
    fn group(&self) -> &str;

    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumeError>;

    /// Called when a delivery will not be retried again. The default just
    /// logs; the notification dispatcher overrides this to dead-letter.
    async fn on_exhausted(&self, delivery: &Delivery, error: &ConsumeError) {
        error!(
            group = self.group(),
            partition_key = %delivery.partition_key,
            offset = delivery.offset,
            attempt = delivery.attempt,
            %error,
            "delivery abandoned"
        );
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Maximum concurrent handler invocations (across partitions)
    pub max_concurrency: usize,

    /// Maximum deliveries to claim per poll
    pub batch_size: usize,

    /// Minimum poll interval (when records are available)
    #[serde(with = "duration_millis")]
    pub min_poll_interval: Duration,

    /// Maximum poll interval (when idle)
    #[serde(with = "duration_millis")]
    pub max_poll_interval: Duration,

    /// Backoff multiplier when no records are found
    pub poll_backoff_multiplier: f64,

    /// Redelivery schedule for transient handler failures
    pub retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            batch_size: 16,
            min_poll_interval: Duration::from_millis(25),
            max_poll_interval: Duration::from_secs(5),
            poll_backoff_multiplier: 1.5,
            retry: RetryPolicy::notification(),
        }
    }
}

impl ConsumerConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }
}

/// Drives a Consumer against one topic until shutdown.
pub struct ConsumerWorker {
    bus: Arc<dyn EventBus>,
    topic: Topic,
    config: ConsumerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConsumerWorker {
    pub fn new(
        bus: Arc<dyn EventBus>,
        topic: Topic,
        config: ConsumerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bus,
            topic,
            config,
            shutdown_rx,
        }
    }

    /// Spawn the polling loop. The returned handle resolves once shutdown
    /// has been signalled and in-flight handlers have finished.
    pub fn spawn<C: Consumer>(self, consumer: Arc<C>) -> JoinHandle<()> {
        tokio::spawn(self.run(consumer))
    }

    async fn run<C: Consumer>(mut self, consumer: Arc<C>) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut poll_interval = self.config.min_poll_interval;

        debug!(topic = %self.topic, group = consumer.group(), "consumer worker started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let available = permits.available_permits();
            if available == 0 {
                if self.wait(poll_interval).await {
                    break;
                }
                continue;
            }

            let batch = available.min(self.config.batch_size);
            let deliveries = match self
                .bus
                .claim(self.topic, consumer.group(), batch)
                .await
            {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    warn!(topic = %self.topic, group = consumer.group(), error = %e, "claim failed");
                    if self.wait(poll_interval).await {
                        break;
                    }
                    poll_interval = self.backoff(poll_interval);
                    continue;
                }
            };

            if deliveries.is_empty() {
                if self.wait(poll_interval).await {
                    break;
                }
                poll_interval = self.backoff(poll_interval);
                continue;
            }
            poll_interval = self.config.min_poll_interval;

            for delivery in deliveries {
                let Ok(permit) = permits.clone().try_acquire_owned() else {
                    // Out of permits mid-batch: nack so another worker (or
                    // the next poll) picks the record up.
                    if let Err(e) = self
                        .bus
                        .nack(self.topic, consumer.group(), delivery.id)
                        .await
                    {
                        warn!(error = %e, "nack failed");
                    }
                    continue;
                };

                let bus = Arc::clone(&self.bus);
                let consumer = Arc::clone(&consumer);
                let topic = self.topic;
                let retry = self.config.retry.clone();

                tokio::spawn(async move {
                    process_delivery(bus, topic, consumer, delivery, retry).await;
                    drop(permit);
                });
            }
        }

        // Drain: wait for in-flight handlers before resolving.
        let _ = permits.acquire_many(self.config.max_concurrency as u32).await;
        debug!(topic = %self.topic, "consumer worker stopped");
    }

    /// Sleep for the interval, returning true if shutdown arrived first.
    async fn wait(&mut self, interval: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = self.shutdown_rx.changed() => *self.shutdown_rx.borrow(),
        }
    }

    fn backoff(&self, current: Duration) -> Duration {
        let next =
            Duration::from_secs_f64(current.as_secs_f64() * self.config.poll_backoff_multiplier);
        next.min(self.config.max_poll_interval)
    }
}

async fn process_delivery<C: Consumer>(
    bus: Arc<dyn EventBus>,
    topic: Topic,
    consumer: Arc<C>,
    delivery: Delivery,
    retry: RetryPolicy,
) {
    let outcome = consumer.handle(&delivery).await;

    let finished = match outcome {
        Ok(()) => true,
        Err(error @ ConsumeError::Poison(_)) => {
            consumer.on_exhausted(&delivery, &error).await;
            true
        }
        Err(error @ ConsumeError::Transient(_)) => {
            if retry.has_attempts_remaining(delivery.attempt) {
                // Hold the partition through the backoff so ordering is
                // preserved, then hand the record back for redelivery.
                let delay = retry.delay_for_attempt(delivery.attempt + 1);
                debug!(
                    group = consumer.group(),
                    partition_key = %delivery.partition_key,
                    attempt = delivery.attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, scheduling redelivery"
                );
                tokio::time::sleep(delay).await;
                false
            } else {
                consumer.on_exhausted(&delivery, &error).await;
                true
            }
        }
    };

    let result = if finished {
        bus.ack(topic, consumer.group(), delivery.id).await
    } else {
        bus.nack(topic, consumer.group(), delivery.id).await
    };
    if let Err(e) = result {
        warn!(group = consumer.group(), error = %e, "failed to settle delivery");
    }
}
