//! Bus Adapter.
//!
//! Thin publish/subscribe wrapper over an ordered, partitioned, at-least-once
//! message bus: poll/ack, at-least-once delivery, idempotent consumers.

pub mod error;
pub mod memory;
pub mod types;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

pub use error::BusError;
pub use memory::InMemoryBus;
pub use types::BusRecord;

/// Producer side of the Bus Adapter.
#[async_trait]
pub trait BusProducer: Send + Sync {
    /// Publish `payload` to `topic`, partitioned by `key` so records for the
    /// same location preserve order. Fails transiently on broker unreachability,
    /// permanently if the payload exceeds the size bound.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Consumer side of the Bus Adapter — one logical partition at a time, so the
/// caller can run one task per partition and preserve per-key ordering without
/// cross-partition coordination.
#[async_trait]
pub trait BusConsumer: Send + Sync {
    fn partition_count(&self, topic: &str) -> usize;

    /// Poll the next unacknowledged record for (topic, partition, group).
    /// Returns `None` if there is nothing new and nothing due for redelivery.
    async fn poll(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
    ) -> Result<Option<BusRecord>, BusError>;

    /// Acknowledge successful processing of `offset`.
    async fn ack(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
        offset: u64,
    ) -> Result<(), BusError>;
}

/// Drive a single-partition consume loop: poll, hand the record to `handler`,
/// ack only on success, sleep briefly when there is nothing to do.
///
/// `handler` returning `Err` leaves the record unacknowledged — the bus
/// redelivers it after its bounded delay, per the at-least-once contract.
pub async fn run_partition_consumer<C, H, Fut>(
    bus: &C,
    topic: &str,
    partition: usize,
    group: &str,
    idle_poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    mut handler: H,
) where
    C: BusConsumer,
    H: FnMut(BusRecord) -> Fut,
    Fut: Future<Output = Result<(), BusError>>,
{
    info!(topic, partition, group, "partition consumer started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match bus.poll(topic, partition, group).await {
            Ok(Some(record)) => {
                let offset = record.offset;
                match handler(record).await {
                    Ok(()) => {
                        if let Err(e) = bus.ack(topic, partition, group, offset).await {
                            warn!(topic, partition, error = %e, "ack failed");
                        }
                    }
                    Err(e) => {
                        warn!(topic, partition, offset, error = %e, "handler failed — leaving unacked for redelivery");
                    }
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(idle_poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                warn!(topic, partition, error = %e, "poll failed");
                tokio::time::sleep(idle_poll_interval).await;
            }
        }
    }
    info!(topic, partition, group, "partition consumer stopped");
}
