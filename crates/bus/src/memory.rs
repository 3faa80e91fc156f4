//! In-process partitioned bus: the pipeline's sole bus backend.
//!
//! The pipeline runs as a single process whose components communicate only
//! via the message bus and the store — a shared, partitioned, ordered channel
//! set inside that one process satisfies the ordering/at-least-once/backpressure
//! contract without standing up an external broker.

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::BusError;
use crate::types::BusRecord;
use crate::{BusConsumer, BusProducer};

const MAX_PAYLOAD_BYTES: usize = 1_000_000;

/// One in-flight (unacknowledged) delivery, tracked per partition.
struct InFlight {
    record: BusRecord,
    redeliver_at: chrono::DateTime<Utc>,
}

struct Partition {
    log: VecDeque<BusRecord>,
    /// Local index of `log`'s first entry — entries before it have been
    /// evicted by `compact`. Cursors are expressed in this same index space.
    base_offset: usize,
    /// Per consumer group: next offset to deliver, and the current in-flight
    /// delivery (at most one — this is what makes per-partition processing
    /// strictly sequential).
    cursors: HashMap<String, usize>,
    in_flight: HashMap<String, InFlight>,
}

impl Partition {
    fn new() -> Self {
        Self {
            log: VecDeque::new(),
            base_offset: 0,
            cursors: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Drop log entries every known consumer group has already consumed past.
    /// A group with no recorded cursor yet holds no entries hostage — it is
    /// seeded at `base_offset` the first time it polls or acks.
    fn compact(&mut self) {
        let Some(&min_cursor) = self.cursors.values().min() else {
            return;
        };
        while self.base_offset < min_cursor {
            if self.log.pop_front().is_none() {
                break;
            }
            self.base_offset += 1;
        }
    }
}

struct Topic {
    partitions: Vec<Partition>,
}

/// Ordered, partitioned, at-least-once in-process message bus.
pub struct InMemoryBus {
    topics: Mutex<HashMap<String, Topic>>,
    num_partitions: usize,
    redelivery_delay: Duration,
    next_offset: AtomicU64,
}

impl InMemoryBus {
    pub fn new(num_partitions: usize, redelivery_delay: Duration) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            num_partitions: num_partitions.max(1),
            redelivery_delay,
            next_offset: AtomicU64::new(0),
        }
    }

    fn partition_for_key(&self, key: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.num_partitions
    }
}

#[async_trait]
impl BusProducer for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(BusError::PermanentPublishFailure(format!(
                "payload of {} bytes exceeds the {} byte bound",
                payload.len(),
                MAX_PAYLOAD_BYTES
            )));
        }
        let partition_idx = self.partition_for_key(key);
        let mut topics = self.topics.lock().await;
        let topic_state = topics.entry(topic.to_string()).or_insert_with(|| Topic {
            partitions: (0..self.num_partitions).map(|_| Partition::new()).collect(),
        });
        let partition = &mut topic_state.partitions[partition_idx];
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        partition.log.push_back(BusRecord {
            topic: topic.to_string(),
            partition: partition_idx,
            offset,
            key: key.to_string(),
            payload,
            published_at: Utc::now(),
            attempt_count: 0,
        });
        Ok(())
    }
}

#[async_trait]
impl BusConsumer for InMemoryBus {
    fn partition_count(&self, _topic: &str) -> usize {
        self.num_partitions
    }

    async fn poll(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
    ) -> Result<Option<BusRecord>, BusError> {
        let mut topics = self.topics.lock().await;
        let Some(topic_state) = topics.get_mut(topic) else {
            return Ok(None);
        };
        let Some(part) = topic_state.partitions.get_mut(partition) else {
            return Err(BusError::Consume(format!(
                "partition {partition} does not exist on topic {topic}"
            )));
        };

        // Redeliver an expired in-flight record first — this preserves order
        // (we never hand out the next offset while an earlier one is stuck).
        if let Some(inflight) = part.in_flight.get_mut(group) {
            if Utc::now() >= inflight.redeliver_at {
                inflight.redeliver_at = Utc::now() + chrono::Duration::from_std(self.redelivery_delay).unwrap_or_default();
                inflight.record.attempt_count += 1;
                return Ok(Some(inflight.record.clone()));
            }
            // Still waiting on the current in-flight record's timeout — this is
            // the backpressure pause: no new record is handed out until it acks
            // or its redelivery window opens.
            return Ok(None);
        }

        let base_offset = part.base_offset;
        let cursor_ref = part.cursors.entry(group.to_string()).or_insert(base_offset);
        if *cursor_ref < base_offset {
            *cursor_ref = base_offset;
        }
        let cursor = *cursor_ref;
        let Some(record) = part.log.get(cursor - base_offset).cloned() else {
            return Ok(None);
        };
        part.in_flight.insert(
            group.to_string(),
            InFlight {
                record: record.clone(),
                redeliver_at: Utc::now() + chrono::Duration::from_std(self.redelivery_delay).unwrap_or_default(),
            },
        );
        Ok(Some(record))
    }

    async fn ack(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
        offset: u64,
    ) -> Result<(), BusError> {
        let mut topics = self.topics.lock().await;
        let topic_state = topics
            .get_mut(topic)
            .ok_or_else(|| BusError::Consume(format!("unknown topic {topic}")))?;
        let part = topic_state
            .partitions
            .get_mut(partition)
            .ok_or_else(|| BusError::Consume(format!("unknown partition {partition}")))?;

        match part.in_flight.get(group) {
            Some(inflight) if inflight.record.offset == offset => {
                part.in_flight.remove(group);
                let base_offset = part.base_offset;
                let next = part.cursors.entry(group.to_string()).or_insert(base_offset);
                *next += 1;
                part.compact();
                Ok(())
            }
            Some(_) | None => {
                // Acking a stale offset (already redelivered past it, or never
                // delivered) is a no-op — at-least-once consumers must tolerate this.
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> InMemoryBus {
        InMemoryBus::new(4, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn publish_then_poll_returns_the_record() {
        let bus = bus();
        bus.publish("t", "loc-a", b"hello".to_vec()).await.unwrap();
        let partition = bus.partition_for_key("loc-a");
        let record = bus.poll("t", partition, "g").await.unwrap().unwrap();
        assert_eq!(record.payload, b"hello");
        assert_eq!(record.attempt_count, 0);
    }

    #[tokio::test]
    async fn same_key_always_lands_on_same_partition_preserving_order() {
        let bus = bus();
        bus.publish("t", "loc-a", b"1".to_vec()).await.unwrap();
        bus.publish("t", "loc-a", b"2".to_vec()).await.unwrap();
        let partition = bus.partition_for_key("loc-a");
        let first = bus.poll("t", partition, "g").await.unwrap().unwrap();
        assert_eq!(first.payload, b"1");
        bus.ack("t", partition, "g", first.offset).await.unwrap();
        let second = bus.poll("t", partition, "g").await.unwrap().unwrap();
        assert_eq!(second.payload, b"2");
    }

    #[tokio::test]
    async fn unacked_record_blocks_next_poll_until_redelivery_window() {
        let bus = bus();
        bus.publish("t", "loc-a", b"1".to_vec()).await.unwrap();
        bus.publish("t", "loc-a", b"2".to_vec()).await.unwrap();
        let partition = bus.partition_for_key("loc-a");

        let first = bus.poll("t", partition, "g").await.unwrap().unwrap();
        // Not acked: immediate re-poll must not hand out "2" — per-partition
        // processing is strictly sequential.
        let again = bus.poll("t", partition, "g").await.unwrap();
        assert!(again.is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let redelivered = bus.poll("t", partition, "g").await.unwrap().unwrap();
        assert_eq!(redelivered.offset, first.offset);
        assert_eq!(redelivered.attempt_count, 1);
    }

    #[tokio::test]
    async fn ack_advances_cursor_and_clears_in_flight() {
        let bus = bus();
        bus.publish("t", "loc-a", b"1".to_vec()).await.unwrap();
        let partition = bus.partition_for_key("loc-a");
        let record = bus.poll("t", partition, "g").await.unwrap().unwrap();
        bus.ack("t", partition, "g", record.offset).await.unwrap();
        assert!(bus.poll("t", partition, "g").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_payload_is_a_permanent_failure() {
        let bus = bus();
        let huge = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let err = bus.publish("t", "loc-a", huge).await.unwrap_err();
        assert!(matches!(err, BusError::PermanentPublishFailure(_)));
    }

    #[tokio::test]
    async fn acked_records_are_evicted_from_the_log() {
        let bus = bus();
        let partition = bus.partition_for_key("loc-a");
        for i in 0..5 {
            bus.publish("t", "loc-a", vec![i]).await.unwrap();
        }
        for _ in 0..5 {
            let record = bus.poll("t", partition, "g").await.unwrap().unwrap();
            bus.ack("t", partition, "g", record.offset).await.unwrap();
        }
        let topics = bus.topics.lock().await;
        let part = &topics.get("t").unwrap().partitions[partition];
        assert!(part.log.is_empty(), "fully acked log should be compacted away");
        assert_eq!(part.base_offset, 5);
    }

    #[tokio::test]
    async fn a_new_consumer_group_is_seeded_past_already_evicted_entries() {
        let bus = bus();
        let partition = bus.partition_for_key("loc-a");
        bus.publish("t", "loc-a", b"1".to_vec()).await.unwrap();
        bus.publish("t", "loc-a", b"2".to_vec()).await.unwrap();
        let first = bus.poll("t", partition, "g").await.unwrap().unwrap();
        bus.ack("t", partition, "g", first.offset).await.unwrap();

        // "g2" never saw offset 0 — it must not try to read an evicted index.
        let for_new_group = bus.poll("t", partition, "g2").await.unwrap().unwrap();
        assert_eq!(for_new_group.payload, b"2");
    }
}
