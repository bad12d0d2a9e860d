//! An example stream handler, grounded on the teacher's
//! `TaskEventHandler` (`apps/zerg/nats-worker::handlers::task_events`) —
//! adapted from per-subject `match` dispatch over individually-subscribed
//! streams to this runtime's batch-oriented `StreamHandler::process`,
//! since stream handlers here own their own ack/nak/term decisions per
//! message rather than the processor acking on their behalf.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cosmo_core::{StreamHandler, StreamMessage};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ClickEvent {
    #[allow(dead_code)]
    page: String,
}

/// Counts and acks click events published on `events.clicks.>`. One
/// instance is shared across every batch dispatched to the `events`
/// stream, so the counter must be (and is) a shared atomic.
#[derive(Default)]
pub struct ClickEventsHandler {
    processed: AtomicU64,
}

impl ClickEventsHandler {
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StreamHandler for ClickEventsHandler {
    async fn process(&self, messages: Vec<StreamMessage>) {
        let batch_len = messages.len();
        for message in messages {
            self.process_one(message).await;
        }
        self.processed.fetch_add(batch_len as u64, Ordering::Relaxed);
    }

    async fn process_one(&self, message: StreamMessage) {
        match message.data::<ClickEvent>() {
            Ok(_event) => {
                if let Err(err) = message.ack().await {
                    warn!(error = %err, "failed to ack click event");
                }
            }
            Err(err) => {
                info!(error = %err, "malformed click event, terming");
                if let Err(err) = message.term().await {
                    warn!(error = %err, "failed to term malformed click event");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmo_core::{AckHandle, JsonSerializer, ProcessingError, Serializer, StreamMessageMeta};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    struct RecordingAck {
        acked: AtomicBool,
    }

    #[async_trait]
    impl AckHandle for RecordingAck {
        async fn ack(&self) -> Result<(), ProcessingError> {
            self.acked.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn nak(&self, _delay: Duration) -> Result<(), ProcessingError> {
            Ok(())
        }

        async fn term(&self) -> Result<(), ProcessingError> {
            Ok(())
        }
    }

    fn meta() -> StreamMessageMeta {
        StreamMessageMeta {
            stream_sequence: 1,
            consumer_sequence: 1,
            num_pending: 0,
            num_delivered: 1,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn acks_well_formed_events_and_counts_them() {
        let handler = ClickEventsHandler::default();
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let raw = serde_json::to_vec(&serde_json::json!({"page": "/home"})).unwrap();
        let ack = Arc::new(RecordingAck {
            acked: AtomicBool::new(false),
        });

        let message = StreamMessage::new(raw, meta(), ack.clone(), serializer);
        handler.process(vec![message]).await;

        assert!(ack.acked.load(Ordering::SeqCst));
        assert_eq!(handler.processed_count(), 1);
    }

    #[tokio::test]
    async fn batches_sum_to_total_processed() {
        let handler = ClickEventsHandler::default();
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);

        for _ in 0..2 {
            let batch: Vec<StreamMessage> = (0..125)
                .map(|_| {
                    let raw = serde_json::to_vec(&serde_json::json!({"page": "/x"})).unwrap();
                    let ack = Arc::new(RecordingAck {
                        acked: AtomicBool::new(false),
                    });
                    StreamMessage::new(raw, meta(), ack, serializer.clone())
                })
                .collect();
            handler.process(batch).await;
        }

        assert_eq!(handler.processed_count(), 250);
    }
}
