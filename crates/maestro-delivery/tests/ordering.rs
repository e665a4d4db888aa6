//! Ordering guarantees of the delivery lane.
//!
//! A slow transport keeps items queued while more arrive, concurrent
//! producers hammer one lane, and failing items prove the loop skips
//! rather than stalls.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult, UserId};
use maestro_delivery::{DeliveryQueue, Transport};

struct TestTransport {
    log: Mutex<Vec<String>>,
    delay: Option<Duration>,
    max_len: usize,
    accept_files: bool,
}

impl TestTransport {
    fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            delay: None,
            max_len: 4000,
            accept_files: true,
        }
    }

    fn sent(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for TestTransport {
    async fn send_text(&self, _user: &UserId, text: &str) -> MaestroResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if text.contains("boom") {
            return Err(MaestroError::Delivery("wire dropped".into()));
        }
        self.log.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_file(
        &self,
        _user: &UserId,
        path: &Path,
        _caption: Option<&str>,
    ) -> MaestroResult<bool> {
        if !self.accept_files {
            return Ok(false);
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("file:{}", path.display()));
        Ok(true)
    }

    fn max_text_len(&self) -> usize {
        self.max_len
    }
}

#[tokio::test]
async fn test_text_file_text_arrive_in_enqueue_order() {
    let transport = Arc::new(TestTransport {
        delay: Some(Duration::from_millis(20)),
        ..TestTransport::new()
    });
    let queue = DeliveryQueue::new(UserId::new("u1"), transport.clone());

    // All three are queued while the first is still in flight.
    queue.send_message("A");
    queue.send_file("report.pdf", None);
    queue.send_message("B");
    queue.flush().await;

    assert_eq!(transport.sent(), ["A", "file:report.pdf", "B"]);
}

#[tokio::test]
async fn test_failed_item_does_not_block_the_lane() {
    let transport = Arc::new(TestTransport::new());
    let queue = DeliveryQueue::new(UserId::new("u1"), transport.clone());

    queue.send_message("boom");
    queue.send_message("after the failure");
    queue.flush().await;

    assert_eq!(transport.sent(), ["after the failure"]);
}

#[tokio::test]
async fn test_missing_file_is_skipped_and_the_lane_continues() {
    let transport = Arc::new(TestTransport {
        accept_files: false,
        ..TestTransport::new()
    });
    let queue = DeliveryQueue::new(UserId::new("u1"), transport.clone());

    queue.send_file("gone.png", Some("caption".into()));
    queue.send_message("still here");
    queue.flush().await;

    assert_eq!(transport.sent(), ["still here"]);
}

#[tokio::test]
async fn test_long_text_is_chunked_in_order() {
    let transport = Arc::new(TestTransport {
        max_len: 10,
        ..TestTransport::new()
    });
    let queue = DeliveryQueue::new(UserId::new("u1"), transport.clone());

    let long = "alpha beta gamma delta epsilon";
    queue.send_message(long);
    queue.send_message("tail");
    queue.flush().await;

    let sent = transport.sent();
    assert!(sent.len() > 2);
    assert_eq!(sent.last().map(String::as_str), Some("tail"));
    let rejoined: String = sent[..sent.len() - 1].concat();
    assert_eq!(rejoined, long);
    assert!(sent[..sent.len() - 1].iter().all(|c| c.len() <= 10));
}

#[tokio::test]
async fn test_concurrent_producers_lose_nothing() {
    let transport = Arc::new(TestTransport::new());
    let queue = DeliveryQueue::new(UserId::new("u1"), transport.clone());

    let mut producers = Vec::new();
    for p in 0..4 {
        let queue = queue.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..25 {
                queue.send_message(format!("p{p}-{i}"));
                tokio::task::yield_now().await;
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    queue.flush().await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 100);
    // Each producer's own messages kept their relative order.
    for p in 0..4 {
        let prefix = format!("p{p}-");
        let indices: Vec<usize> = sent
            .iter()
            .filter(|m| m.starts_with(&prefix))
            .map(|m| m[prefix.len()..].parse().unwrap())
            .collect();
        assert_eq!(indices, (0..25).collect::<Vec<_>>());
    }
}
