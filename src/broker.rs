// ===============================
// src/broker.rs
// ===============================
//
// In-process stand-in for the event broker contract the pipeline consumes:
// - bounded partitioned queues; a symbol always hashes to one partition,
//   so per-symbol delivery order is per-partition FIFO
// - at-least-once: a message is gone only once the consumer acks it
// - nack requeues at the FRONT (order preserved) and routes to the
//   dead-letter channel once the attempt budget is spent
// - dropping an unacked Delivery requeues it, so stopping a worker mid
//   flight never loses an event
//
// One consumer per partition. No ordering guarantee across partitions.
//
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::warn;

use crate::domain::{DeadLetter, TradeEvent};
use crate::metrics::{DEAD_LETTERS, EVENTS_PUBLISHED, PUBLISH_REJECTED, REDELIVERIES};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker queue full (partition {0})")]
    QueueFull(usize),
    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

struct Queued {
    payload: Vec<u8>,
    // deliveries so far; 0 until the first one
    attempt: u32,
}

struct Partition {
    id: usize,
    queue: Mutex<VecDeque<Queued>>,
    notify: Notify,
}

impl Partition {
    fn requeue_front(&self, msg: Queued) {
        self.queue.lock().unwrap().push_front(msg);
        self.notify.notify_one();
    }
}

pub struct Broker {
    partitions: Vec<Arc<Partition>>,
    dead_tx: mpsc::Sender<DeadLetter>,
    queue_depth: usize,
    max_attempts: u32,
    hasher: ahash::RandomState,
}

impl Broker {
    pub fn new(
        partitions: usize,
        queue_depth: usize,
        max_attempts: u32,
        dead_tx: mpsc::Sender<DeadLetter>,
    ) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|id| {
                Arc::new(Partition {
                    id,
                    queue: Mutex::new(VecDeque::new()),
                    notify: Notify::new(),
                })
            })
            .collect();
        Self {
            partitions,
            dead_tx,
            queue_depth: queue_depth.max(1),
            max_attempts: max_attempts.max(1),
            hasher: ahash::RandomState::new(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_for(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) % self.partitions.len() as u64) as usize
    }

    /// Publish a trade event. The caller waits only on queue admission; a
    /// full queue is an explicit error, never a silent drop.
    pub fn publish(&self, event: &TradeEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.publish_raw(&event.symbol, payload)
    }

    /// Raw payload publish, partitioned by key. This is also how a foreign
    /// producer could hand us bytes we cannot parse.
    pub fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let part = &self.partitions[self.partition_for(key)];
        {
            let mut q = part.queue.lock().unwrap();
            if q.len() >= self.queue_depth {
                PUBLISH_REJECTED.inc();
                return Err(PublishError::QueueFull(part.id));
            }
            q.push_back(Queued { payload, attempt: 0 });
        }
        part.notify.notify_one();
        EVENTS_PUBLISHED.inc();
        Ok(())
    }

    pub fn consumer(&self, partition: usize) -> PartitionConsumer {
        PartitionConsumer {
            partition: Arc::clone(&self.partitions[partition]),
            dead_tx: self.dead_tx.clone(),
            max_attempts: self.max_attempts,
        }
    }
}

pub struct PartitionConsumer {
    partition: Arc<Partition>,
    dead_tx: mpsc::Sender<DeadLetter>,
    max_attempts: u32,
}

impl PartitionConsumer {
    pub fn id(&self) -> usize {
        self.partition.id
    }

    /// Wait for the next delivery on this partition.
    pub async fn next(&self) -> Delivery {
        loop {
            // register interest before checking, so a publish between the
            // check and the await still wakes us
            let notified = self.partition.notify.notified();
            if let Some(mut msg) = self.partition.queue.lock().unwrap().pop_front() {
                msg.attempt += 1;
                return Delivery {
                    msg: Some(msg),
                    partition: Arc::clone(&self.partition),
                    dead_tx: self.dead_tx.clone(),
                    max_attempts: self.max_attempts,
                };
            }
            notified.await;
        }
    }
}

/// One in-flight message. Must be resolved with `ack`, `nack` or `reject`;
/// if it is simply dropped the message goes back to the front of its
/// partition and will be delivered again.
pub struct Delivery {
    msg: Option<Queued>,
    partition: Arc<Partition>,
    dead_tx: mpsc::Sender<DeadLetter>,
    max_attempts: u32,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        self.msg.as_ref().map(|m| m.payload.as_slice()).unwrap_or(&[])
    }

    /// 1-based delivery count for this message.
    pub fn attempt(&self) -> u32 {
        self.msg.as_ref().map(|m| m.attempt).unwrap_or(0)
    }

    pub fn partition(&self) -> usize {
        self.partition.id
    }

    /// Processing finished (applied or recognized as a duplicate).
    pub fn ack(mut self) {
        self.msg = None;
    }

    /// Transient failure: requeue for redelivery, or dead-letter once the
    /// attempt budget is exhausted.
    pub async fn nack(mut self) {
        if let Some(msg) = self.msg.take() {
            if msg.attempt >= self.max_attempts {
                self.dead_letter(msg, "max delivery attempts exhausted").await;
            } else {
                REDELIVERIES.inc();
                self.partition.requeue_front(msg);
            }
        }
    }

    /// Permanent failure (poison message): straight to the dead-letter
    /// path, never back on the partition.
    pub async fn reject(mut self, reason: &str) {
        if let Some(msg) = self.msg.take() {
            self.dead_letter(msg, reason).await;
        }
    }

    async fn dead_letter(&self, msg: Queued, reason: &str) {
        DEAD_LETTERS.inc();
        let entry = DeadLetter {
            partition: self.partition.id,
            attempt: msg.attempt,
            reason: reason.to_string(),
            payload: String::from_utf8_lossy(&msg.payload).into_owned(),
            ts_ms: Utc::now().timestamp_millis(),
        };
        if self.dead_tx.send(entry).await.is_err() {
            warn!(partition = self.partition.id, "dead letter sink closed, entry dropped");
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        // unresolved in-flight message returns to the queue unchanged
        if let Some(msg) = self.msg.take() {
            self.partition.requeue_front(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn event(symbol: &str) -> TradeEvent {
        TradeEvent {
            trade_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side: Side::Sell,
            quantity: 1,
            price: dec!(1.0),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn broker(partitions: usize, depth: usize, max_attempts: u32) -> (Broker, mpsc::Receiver<DeadLetter>) {
        let (dead_tx, dead_rx) = mpsc::channel(16);
        (Broker::new(partitions, depth, max_attempts, dead_tx), dead_rx)
    }

    #[tokio::test]
    async fn same_key_stays_in_order_on_one_partition() {
        let (broker, _dead_rx) = broker(4, 64, 3);
        for i in 0..5u8 {
            broker.publish_raw("XYZ", vec![i]).unwrap();
        }
        let consumer = broker.consumer(broker.partition_for("XYZ"));
        for i in 0..5u8 {
            let d = consumer.next().await;
            assert_eq!(d.payload(), &[i]);
            d.ack();
        }
    }

    #[tokio::test]
    async fn nack_redelivers_in_front_of_later_messages() {
        let (broker, _dead_rx) = broker(1, 64, 3);
        broker.publish_raw("XYZ", b"first".to_vec()).unwrap();
        broker.publish_raw("XYZ", b"second".to_vec()).unwrap();

        let consumer = broker.consumer(0);
        let d = consumer.next().await;
        assert_eq!(d.payload(), b"first");
        assert_eq!(d.attempt(), 1);
        d.nack().await;

        // redelivered ahead of "second", with the attempt bumped
        let d = consumer.next().await;
        assert_eq!(d.payload(), b"first");
        assert_eq!(d.attempt(), 2);
        d.ack();
        let d = consumer.next().await;
        assert_eq!(d.payload(), b"second");
        d.ack();
    }

    #[tokio::test]
    async fn exhausted_attempts_route_to_dead_letters() {
        let (broker, mut dead_rx) = broker(1, 64, 2);
        broker.publish_raw("XYZ", b"poisonish".to_vec()).unwrap();

        let consumer = broker.consumer(0);
        consumer.next().await.nack().await; // attempt 1 -> requeued
        consumer.next().await.nack().await; // attempt 2 == budget -> dead letter

        let entry = dead_rx.recv().await.unwrap();
        assert_eq!(entry.attempt, 2);
        assert_eq!(entry.reason, "max delivery attempts exhausted");
        assert!(broker.partitions[0].queue.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reject_skips_the_retry_cycle() {
        let (broker, mut dead_rx) = broker(1, 64, 5);
        broker.publish_raw("XYZ", b"junk".to_vec()).unwrap();

        let consumer = broker.consumer(0);
        consumer.next().await.reject("malformed payload").await;

        let entry = dead_rx.recv().await.unwrap();
        assert_eq!(entry.reason, "malformed payload");
        assert_eq!(entry.attempt, 1);
    }

    #[tokio::test]
    async fn dropped_delivery_is_redelivered() {
        let (broker, _dead_rx) = broker(1, 64, 3);
        broker.publish_raw("XYZ", b"inflight".to_vec()).unwrap();

        let consumer = broker.consumer(0);
        drop(consumer.next().await); // worker died mid-flight

        let d = consumer.next().await;
        assert_eq!(d.payload(), b"inflight");
        assert_eq!(d.attempt(), 2);
        d.ack();
    }

    #[tokio::test]
    async fn full_queue_rejects_publish() {
        let (broker, _dead_rx) = broker(1, 1, 3);
        broker.publish(&event("XYZ")).unwrap();
        let err = broker.publish(&event("XYZ")).unwrap_err();
        assert!(matches!(err, PublishError::QueueFull(0)));
    }
}
