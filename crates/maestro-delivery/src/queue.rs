//! The per-user ordered delivery lane.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use maestro_core::{MaestroResult, Notifier, UserId};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::chunk::chunk_text;
use crate::transport::Transport;

/// One queued outbound item.
#[derive(Debug, Clone)]
pub enum QueuedMessage {
    /// Plain text, chunked on send if the transport requires it.
    Text(String),
    /// A file with an optional caption.
    File {
        path: PathBuf,
        caption: Option<String>,
    },
}

struct LaneState {
    queue: VecDeque<QueuedMessage>,
    draining: bool,
}

/// Strictly ordered outbound delivery for one user.
///
/// Enqueueing never blocks on the transport: items are pushed under a
/// brief lock and a single drain loop per lane sends them one at a time
/// in FIFO order. The `draining` flag is only cleared under the same
/// lock acquisition that observed an empty queue, so an enqueue racing
/// the loop's exit either sees the loop still active or starts a new
/// one. An item that fails to send is logged and skipped; it never
/// blocks the items behind it.
#[derive(Clone)]
pub struct DeliveryQueue {
    user_id: UserId,
    transport: Arc<dyn Transport>,
    lane: Arc<Mutex<LaneState>>,
}

impl DeliveryQueue {
    /// Creates an empty lane for one user.
    pub fn new(user_id: UserId, transport: Arc<dyn Transport>) -> Self {
        Self {
            user_id,
            transport,
            lane: Arc::new(Mutex::new(LaneState {
                queue: VecDeque::new(),
                draining: false,
            })),
        }
    }

    /// Queues one text message and returns immediately.
    pub fn send_message(&self, text: impl Into<String>) {
        self.enqueue(QueuedMessage::Text(text.into()));
    }

    /// Queues one file and returns immediately.
    pub fn send_file(&self, path: impl Into<PathBuf>, caption: Option<String>) {
        self.enqueue(QueuedMessage::File {
            path: path.into(),
            caption,
        });
    }

    /// Items waiting in the lane (not counting one currently in flight).
    pub fn pending_len(&self) -> usize {
        self.lane.lock().queue.len()
    }

    /// Waits until the lane is empty and the drain loop has exited.
    pub async fn flush(&self) {
        loop {
            {
                let lane = self.lane.lock();
                if lane.queue.is_empty() && !lane.draining {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn enqueue(&self, message: QueuedMessage) {
        let start_drain = {
            let mut lane = self.lane.lock();
            lane.queue.push_back(message);
            if lane.draining {
                false
            } else {
                lane.draining = true;
                true
            }
        };
        if start_drain {
            let queue = self.clone();
            tokio::spawn(async move { queue.drain().await });
        }
    }

    async fn drain(&self) {
        loop {
            let next = {
                let mut lane = self.lane.lock();
                match lane.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        lane.draining = false;
                        return;
                    }
                }
            };
            self.deliver(next).await;
        }
    }

    async fn deliver(&self, message: QueuedMessage) {
        match message {
            QueuedMessage::Text(text) => {
                for piece in chunk_text(&text, self.transport.max_text_len()) {
                    if let Err(e) = self.transport.send_text(&self.user_id, &piece).await {
                        warn!(user_id = %self.user_id, error = %e, "text delivery failed");
                    }
                }
            }
            QueuedMessage::File { path, caption } => {
                match self
                    .transport
                    .send_file(&self.user_id, &path, caption.as_deref())
                    .await
                {
                    Ok(true) => debug!(user_id = %self.user_id, path = %path.display(), "file delivered"),
                    Ok(false) => warn!(
                        user_id = %self.user_id,
                        path = %path.display(),
                        "file skipped, missing or too large"
                    ),
                    Err(e) => warn!(user_id = %self.user_id, error = %e, "file delivery failed"),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DeliveryQueue {
    async fn notify(&self, text: &str) -> MaestroResult<()> {
        self.send_message(text);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct LogTransport {
        log: StdMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Transport for LogTransport {
        async fn send_text(&self, _user: &UserId, text: &str) -> MaestroResult<()> {
            self.log.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_file(
            &self,
            _user: &UserId,
            path: &Path,
            _caption: Option<&str>,
        ) -> MaestroResult<bool> {
            self.log
                .lock()
                .unwrap()
                .push(format!("file:{}", path.display()));
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_enqueue_returns_before_delivery() {
        let transport = Arc::new(LogTransport::default());
        let queue = DeliveryQueue::new(UserId::new("u1"), transport.clone());
        queue.send_message("hi");
        queue.flush().await;
        assert_eq!(transport.log.lock().unwrap().as_slice(), ["hi"]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_notifier_routes_through_the_lane() {
        let transport = Arc::new(LogTransport::default());
        let queue = DeliveryQueue::new(UserId::new("u1"), transport.clone());
        queue.notify("from a task").await.unwrap();
        queue.flush().await;
        assert_eq!(transport.log.lock().unwrap().as_slice(), ["from a task"]);
    }

    #[tokio::test]
    async fn test_drain_loop_restarts_after_idle() {
        let transport = Arc::new(LogTransport::default());
        let queue = DeliveryQueue::new(UserId::new("u1"), transport.clone());
        queue.send_message("first");
        queue.flush().await;
        queue.send_message("second");
        queue.flush().await;
        assert_eq!(
            transport.log.lock().unwrap().as_slice(),
            ["first", "second"]
        );
    }
}
