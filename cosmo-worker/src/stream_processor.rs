//! The stream message pump: setup, the round-robin batch work loop, and
//! the broker-backed [`cosmo_core::AckHandle`] adapter.
//!
//! Grounded on `messaging::nats::worker`'s batch-fetch/dispatch shape,
//! generalized from ack-on-behalf-of-the-handler to spec.md §4.6's explicit
//! contract: the processor never acks, the handler does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::Consumer;
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use cosmo_core::{AckHandle, ProcessingError, Registry, StreamHandler, StreamMessage, StreamMessageMeta};
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::broker::{self, BrokerClient};
use crate::error::BrokerError;
use crate::metrics::StreamMetrics;
use crate::pool::BoundedPool;

/// Adapts a raw `async-nats` jetstream message to [`cosmo_core::AckHandle`]
/// so `cosmo-core` never depends on the broker SDK.
pub struct NatsAckHandle(async_nats::jetstream::Message);

#[async_trait]
impl AckHandle for NatsAckHandle {
    async fn ack(&self) -> Result<(), ProcessingError> {
        self.0
            .ack()
            .await
            .map_err(|e| ProcessingError::Custom {
                category: cosmo_core::ErrorCategory::Transient,
                message: format!("ack failed: {e}"),
            })
    }

    async fn nak(&self, delay: Duration) -> Result<(), ProcessingError> {
        self.0
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| ProcessingError::Custom {
                category: cosmo_core::ErrorCategory::Transient,
                message: format!("nak failed: {e}"),
            })
    }

    async fn term(&self) -> Result<(), ProcessingError> {
        self.0
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| ProcessingError::Custom {
                category: cosmo_core::ErrorCategory::Transient,
                message: format!("term failed: {e}"),
            })
    }
}

/// Drives every registered stream handler's fetch-and-dispatch loop.
pub struct StreamProcessor {
    broker: BrokerClient,
    pool: Arc<BoundedPool>,
    registry: Arc<Registry>,
    metrics: StreamMetrics,
    fetch_timeout: Duration,
}

impl StreamProcessor {
    pub fn new(
        broker: BrokerClient,
        pool: Arc<BoundedPool>,
        registry: Arc<Registry>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            pool,
            registry,
            metrics: StreamMetrics,
            fetch_timeout,
        }
    }

    async fn setup(&self) -> Result<HashMap<String, (Consumer<PullConfig>, Arc<dyn StreamHandler>)>, BrokerError> {
        let mut bound = HashMap::new();
        for (stream, config) in self.registry.streams() {
            self.broker
                .ensure_stream(
                    stream,
                    config.subjects.clone(),
                    Duration::from_secs(7 * 24 * 60 * 60),
                )
                .await?;

            let consumer = self
                .broker
                .subscribe(
                    stream,
                    &config.consumer_name,
                    broker::SubscribeConfig {
                        subjects: config.subjects.clone(),
                        max_deliver: config.consumer.max_deliver,
                        max_ack_pending: config.consumer.max_ack_pending,
                        ack_wait: config.consumer.ack_wait,
                        deliver_policy: broker::deliver_policy_for(&config.start_position),
                    },
                )
                .await?;

            let handler = (config.handler_factory)();
            bound.insert(stream.clone(), (consumer, handler));
        }
        Ok(bound)
    }

    /// Runs until `running` reports `false`. Does nothing if no streams
    /// are registered.
    pub async fn run(&self, mut running: tokio::sync::watch::Receiver<bool>) -> Result<(), BrokerError> {
        if self.registry.streams().is_empty() {
            info!("no streams registered, stream processor not starting");
            return Ok(());
        }

        let bound = self.setup().await?;
        let stream_names: Vec<String> = bound.keys().cloned().collect();

        'outer: loop {
            if !*running.borrow() {
                break;
            }

            for stream in &stream_names {
                if !*running.borrow() {
                    break 'outer;
                }

                let (consumer, handler) = bound.get(stream).expect("bound during setup").clone();
                let config = self.registry.streams().get(stream).expect("registered").clone();
                let metrics = self.metrics;
                let stream_name = stream.clone();

                let timeout = self.fetch_timeout;
                let submitted = self
                    .pool
                    .post(async move {
                        if let Err(err) =
                            fetch_and_dispatch(&stream_name, consumer, handler, config, metrics, timeout)
                                .await
                        {
                            error!(stream = %stream_name, error = %err, "stream batch fetch failed");
                        }
                    })
                    .await;

                if submitted.is_err() {
                    info!("pool rejected submission, stream processor stopping");
                    break 'outer;
                }
            }
        }

        Ok(())
    }
}

async fn fetch_and_dispatch(
    stream: &str,
    consumer: Consumer<PullConfig>,
    handler: Arc<dyn StreamHandler>,
    config: cosmo_core::StreamHandlerConfig,
    metrics: StreamMetrics,
    fetch_timeout: Duration,
) -> Result<(), BrokerError> {
    let mut raw_messages = consumer
        .fetch()
        .max_messages(config.batch_size)
        .expires(fetch_timeout)
        .messages()
        .await
        .map_err(|e| BrokerError::consumer_error(e.to_string()))?;

    let mut batch = Vec::new();
    let mut last_meta: Option<StreamMessageMeta> = None;

    while let Some(msg) = raw_messages.next().await {
        let message = match msg {
            Ok(m) => m,
            Err(err) => {
                warn!(stream = %stream, error = %err, "error receiving stream message");
                continue;
            }
        };

        let info = message.info().map_err(|e| BrokerError::consumer_error(e.to_string()))?;
        let meta = StreamMessageMeta {
            stream_sequence: info.stream_sequence,
            consumer_sequence: info.consumer_sequence,
            num_pending: info.pending,
            num_delivered: info.delivered as u64,
            timestamp: broker::to_chrono_date_time(info.published),
        };
        last_meta = Some(meta.clone());

        let raw = message.payload.to_vec();
        let ack_handle: Arc<dyn AckHandle> = Arc::new(NatsAckHandle(message));
        batch.push(StreamMessage::new(raw, meta, ack_handle, config.serializer.clone()));
    }

    if batch.is_empty() {
        return Ok(());
    }

    if let Some(meta) = &last_meta {
        info!(
            stream = %stream,
            seq_stream = meta.stream_sequence,
            seq_consumer = meta.consumer_sequence,
            num_pending = meta.num_pending,
            timestamp = %meta.timestamp,
            "batch received"
        );
        metrics.batch_received(stream, meta.num_pending);
    }

    let start = Instant::now();
    // `StreamHandler::process` returns `()`, so a panic is the only
    // "handler error" signal; spawning turns it into a `JoinError` this
    // function can log and recover from under a dev (unwind) profile. A
    // `panic = 'abort'` release build still takes the whole process down.
    let outcome = tokio::spawn(async move { handler.process(batch).await }).await;
    let elapsed = start.elapsed();

    match outcome {
        Ok(()) => {
            info!(stream = %stream, elapsed_secs = elapsed.as_secs_f64(), "done");
            metrics.batch_done(stream, elapsed);
        }
        Err(err) => {
            error!(stream = %stream, elapsed_secs = elapsed.as_secs_f64(), error = %err, "fail");
            metrics.batch_failed(stream);
        }
    }

    Ok(())
}
