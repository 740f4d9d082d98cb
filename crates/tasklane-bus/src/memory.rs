//! In-memory bus implementation
//!
//! Backs development and tests with the same delivery semantics as the
//! production broker: per-partition-key ordering, consumer-group cursors,
//! at-least-once redelivery, and bounded retention. State lives behind a
//! single mutex; every operation is short and non-blocking.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use tasklane_core::Topic;

use crate::client::{BusError, Delivery, EventBus};

struct StoredRecord {
    offset: u64,
    published_at: DateTime<Utc>,
    body: String,
}

#[derive(Default)]
struct PartitionLog {
    /// Offset of the first retained record.
    head_offset: u64,
    records: VecDeque<StoredRecord>,
}

impl PartitionLog {
    fn next_offset(&self) -> u64 {
        self.head_offset + self.records.len() as u64
    }

    fn trim_older_than(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.records.front() {
            if front.published_at >= cutoff {
                break;
            }
            self.records.pop_front();
            self.head_offset += 1;
        }
    }
}

#[derive(Default)]
struct Cursor {
    next_offset: u64,
    /// Deliveries of the record at next_offset so far.
    attempt: u32,
    in_flight: Option<Uuid>,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<Topic, HashMap<String, PartitionLog>>,
    groups: HashMap<(Topic, String), HashMap<String, Cursor>>,
    in_flight: HashMap<Uuid, (Topic, String, String)>,
}

/// In-memory implementation of the EventBus.
pub struct InMemoryBus {
    inner: Mutex<Inner>,
    retention_override: Option<Duration>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retention_override: None,
        }
    }

    /// Override every topic's retention window (for expiry tests).
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_override = Some(retention);
        self
    }

    fn retention(&self, topic: Topic) -> Duration {
        self.retention_override.unwrap_or_else(|| topic.retention())
    }

    /// Records published before this instant have aged out of the topic.
    fn retention_cutoff(&self, topic: Topic) -> DateTime<Utc> {
        let retention = chrono::Duration::from_std(self.retention(topic))
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Number of retained records on a topic, across all partitions.
    pub fn record_count(&self, topic: Topic) -> usize {
        let inner = self.inner.lock();
        inner
            .topics
            .get(&topic)
            .map(|partitions| partitions.values().map(|log| log.records.len()).sum())
            .unwrap_or(0)
    }

    /// Clear all records and cursors (for testing).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.topics.clear();
        inner.groups.clear();
        inner.in_flight.clear();
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish_raw(&self, topic: Topic, key: &str, body: String) -> Result<(), BusError> {
        let cutoff = self.retention_cutoff(topic);

        let mut inner = self.inner.lock();
        let log = inner
            .topics
            .entry(topic)
            .or_default()
            .entry(key.to_string())
            .or_default();
        log.trim_older_than(cutoff);
        let offset = log.next_offset();
        log.records.push_back(StoredRecord {
            offset,
            published_at: Utc::now(),
            body,
        });
        Ok(())
    }

    async fn claim(
        &self,
        topic: Topic,
        group: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, BusError> {
        let cutoff = self.retention_cutoff(topic);

        let mut inner = self.inner.lock();
        let Inner {
            topics,
            groups,
            in_flight,
        } = &mut *inner;

        let Some(partitions) = topics.get_mut(&topic) else {
            return Ok(vec![]);
        };
        let cursors = groups.entry((topic, group.to_string())).or_default();

        let mut deliveries = Vec::new();
        for (key, log) in partitions.iter_mut() {
            if deliveries.len() >= max {
                break;
            }
            log.trim_older_than(cutoff);

            let cursor = cursors.entry(key.clone()).or_insert_with(|| Cursor {
                next_offset: log.head_offset,
                ..Default::default()
            });
            if cursor.in_flight.is_some() {
                continue;
            }
            // Records the group never saw may have expired out from under it.
            if cursor.next_offset < log.head_offset {
                cursor.next_offset = log.head_offset;
                cursor.attempt = 0;
            }
            let index = (cursor.next_offset - log.head_offset) as usize;
            let Some(record) = log.records.get(index) else {
                continue;
            };

            let delivery_id = Uuid::new_v4();
            cursor.attempt += 1;
            cursor.in_flight = Some(delivery_id);
            in_flight.insert(
                delivery_id,
                (topic, group.to_string(), key.clone()),
            );

            deliveries.push(Delivery {
                id: delivery_id,
                partition_key: key.clone(),
                offset: record.offset,
                attempt: cursor.attempt,
                published_at: record.published_at,
                body: record.body.clone(),
            });
        }

        Ok(deliveries)
    }

    async fn ack(&self, topic: Topic, group: &str, delivery_id: Uuid) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        let Some((t, g, key)) = inner.in_flight.remove(&delivery_id) else {
            return Err(BusError::UnknownDelivery(delivery_id));
        };
        debug_assert_eq!((t, g.as_str()), (topic, group));

        if let Some(cursor) = inner
            .groups
            .get_mut(&(topic, group.to_string()))
            .and_then(|cursors| cursors.get_mut(&key))
        {
            cursor.in_flight = None;
            cursor.next_offset += 1;
            cursor.attempt = 0;
        }
        Ok(())
    }

    async fn nack(&self, topic: Topic, group: &str, delivery_id: Uuid) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        let Some((_, _, key)) = inner.in_flight.remove(&delivery_id) else {
            return Err(BusError::UnknownDelivery(delivery_id));
        };

        if let Some(cursor) = inner
            .groups
            .get_mut(&(topic, group.to_string()))
            .and_then(|cursors| cursors.get_mut(&key))
        {
            cursor.in_flight = None;
        }
        Ok(())
    }
}
