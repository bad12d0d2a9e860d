//! Handler traits and the process-wide registry.
//!
//! Registration happens before `Engine::run` (via explicit `register_job`/
//! `register_stream` calls on a [`RegistryBuilder`] — the systems-language
//! analogue of the source's module-inclusion side effect). `build()`
//! consumes the builder and returns an `Arc<Registry>` with no mutation
//! path, so the registry is read-only by construction once the engine
//! starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::ProcessingError;

/// A job handler. A fresh instance is constructed per message (via the
/// registered [`JobHandlerFactory`]), so implementations carry no required
/// interior-mutable shared state.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, jid: &str, args: &[serde_json::Value]) -> Result<(), ProcessingError>;
}

/// Builds a fresh `JobHandler` instance per invocation.
pub type JobHandlerFactory = Arc<dyn Fn() -> Arc<dyn JobHandler> + Send + Sync>;

/// Per-message broker operations a [`StreamMessage`] delegates to.
///
/// Kept as a trait so `cosmo-core` never depends on a concrete broker SDK;
/// `cosmo-worker` supplies the `async-nats`-backed implementation.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self) -> Result<(), ProcessingError>;
    async fn nak(&self, delay: Duration) -> Result<(), ProcessingError>;
    async fn term(&self) -> Result<(), ProcessingError>;
}

/// Pluggable payload codec. Default is JSON; a `StreamHandlerConfig` or
/// `Publisher` call may supply another implementation.
pub trait Serializer: Send + Sync {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, ProcessingError>;
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, ProcessingError>;
}

/// The default JSON serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, ProcessingError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, ProcessingError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Metadata the broker attaches to a delivered stream message.
#[derive(Debug, Clone)]
pub struct StreamMessageMeta {
    pub stream_sequence: u64,
    pub consumer_sequence: u64,
    pub num_pending: u64,
    pub num_delivered: u64,
    pub timestamp: DateTime<Utc>,
}

/// An opaque broker message plus metadata, wrapped with a serializer so the
/// user handler sees decoded data and can `ack`, `nak(delay)`, or `term`.
/// The processor never calls these on the handler's behalf.
pub struct StreamMessage {
    raw: Vec<u8>,
    meta: StreamMessageMeta,
    ack_handle: Arc<dyn AckHandle>,
    serializer: Arc<dyn Serializer>,
}

impl StreamMessage {
    pub fn new(
        raw: Vec<u8>,
        meta: StreamMessageMeta,
        ack_handle: Arc<dyn AckHandle>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            raw,
            meta,
            ack_handle,
            serializer,
        }
    }

    /// Lazily decode the payload with this message's serializer.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ProcessingError> {
        let value = self.serializer.decode(&self.raw)?;
        serde_json::from_value(value).map_err(ProcessingError::from)
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn meta(&self) -> &StreamMessageMeta {
        &self.meta
    }

    pub async fn ack(&self) -> Result<(), ProcessingError> {
        self.ack_handle.ack().await
    }

    pub async fn nak(&self, delay: Duration) -> Result<(), ProcessingError> {
        self.ack_handle.nak(delay).await
    }

    pub async fn term(&self) -> Result<(), ProcessingError> {
        self.ack_handle.term().await
    }
}

/// A stream handler. One instance is created per registered stream and
/// reused across batches — implementations that keep state must
/// synchronize it themselves.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Process a batch. The default iterates `process_one`; override this
    /// instead to batch-ack or otherwise treat the batch as a unit.
    async fn process(&self, messages: Vec<StreamMessage>) {
        for message in messages {
            self.process_one(message).await;
        }
    }

    /// Process a single message. Default no-op; override this for
    /// per-message handling under the default `process`.
    async fn process_one(&self, _message: StreamMessage) {}
}

/// Where a freshly bound consumer starts reading.
#[derive(Debug, Clone)]
pub enum StartPosition {
    First,
    Last,
    New,
    Timestamp(DateTime<Utc>),
}

/// Broker-level pull consumer knobs, backend-agnostic.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub max_deliver: i64,
    pub max_ack_pending: i64,
    pub ack_wait: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_deliver: -1,
            max_ack_pending: 1000,
            ack_wait: Duration::from_secs(30),
        }
    }
}

/// Registry entry for one `consumers.jobs.<stream>` config.
#[derive(Debug, Clone)]
pub struct JobStreamConfig {
    pub subject: String,
    pub priority: u32,
    pub consumer: ConsumerSettings,
}

impl JobStreamConfig {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            priority: 1,
            consumer: ConsumerSettings::default(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerSettings) -> Self {
        self.consumer = consumer;
        self
    }
}

/// Builds a fresh `StreamHandler` instance at registration time (reused
/// across batches, unlike job handlers).
pub type StreamHandlerFactory = Arc<dyn Fn() -> Arc<dyn StreamHandler> + Send + Sync>;

/// Registry entry merging module-registered defaults with any
/// `consumers.streams` override.
#[derive(Clone)]
pub struct StreamHandlerConfig {
    pub stream: String,
    pub consumer_name: String,
    pub subjects: Vec<String>,
    pub batch_size: usize,
    pub start_position: StartPosition,
    pub consumer: ConsumerSettings,
    pub serializer: Arc<dyn Serializer>,
    pub handler_factory: StreamHandlerFactory,
}

impl StreamHandlerConfig {
    pub fn new(
        stream: impl Into<String>,
        consumer_name: impl Into<String>,
        subjects: Vec<String>,
        handler_factory: StreamHandlerFactory,
    ) -> Self {
        Self {
            stream: stream.into(),
            consumer_name: consumer_name.into(),
            subjects,
            batch_size: 100,
            start_position: StartPosition::New,
            consumer: ConsumerSettings::default(),
            serializer: Arc::new(JsonSerializer),
            handler_factory,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_start_position(mut self, position: StartPosition) -> Self {
        self.start_position = position;
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerSettings) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }
}

/// Process-wide, read-after-start registry.
pub struct Registry {
    job_handlers: HashMap<String, JobHandlerFactory>,
    jobs: HashMap<String, JobStreamConfig>,
    streams: HashMap<String, StreamHandlerConfig>,
    priority_weights: Vec<String>,
}

impl Registry {
    pub fn resolve_job_handler(&self, class: &str) -> Option<Arc<dyn JobHandler>> {
        self.job_handlers.get(class).map(|factory| factory())
    }

    pub fn jobs(&self) -> &HashMap<String, JobStreamConfig> {
        &self.jobs
    }

    pub fn streams(&self) -> &HashMap<String, StreamHandlerConfig> {
        &self.streams
    }

    /// The fetch-loop rotation: each jobs-stream name repeated `priority`
    /// times. Empty if no stream declares a priority.
    pub fn priority_weights(&self) -> &[String] {
        &self.priority_weights
    }
}

/// Accumulates handler registrations and config before the engine starts.
#[derive(Default)]
pub struct RegistryBuilder {
    job_handlers: HashMap<String, JobHandlerFactory>,
    jobs: HashMap<String, JobStreamConfig>,
    streams: HashMap<String, StreamHandlerConfig>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_job<F>(mut self, class: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn JobHandler> + Send + Sync + 'static,
    {
        self.job_handlers.insert(class.into(), Arc::new(factory));
        self
    }

    pub fn configure_job_stream(mut self, stream: impl Into<String>, config: JobStreamConfig) -> Self {
        self.jobs.insert(stream.into(), config);
        self
    }

    pub fn register_stream(mut self, config: StreamHandlerConfig) -> Self {
        self.streams.insert(config.stream.clone(), config);
        self
    }

    pub fn build(self) -> Arc<Registry> {
        let mut priority_weights = Vec::new();
        for (stream, config) in &self.jobs {
            for _ in 0..config.priority {
                priority_weights.push(stream.clone());
            }
        }

        Arc::new(Registry {
            job_handlers: self.job_handlers,
            jobs: self.jobs,
            streams: self.streams,
            priority_weights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopJob;

    #[async_trait]
    impl JobHandler for NoopJob {
        async fn perform(&self, _jid: &str, _args: &[serde_json::Value]) -> Result<(), ProcessingError> {
            Ok(())
        }
    }

    #[test]
    fn priority_weights_repeat_stream_names() {
        let registry = RegistryBuilder::new()
            .configure_job_stream("critical", JobStreamConfig::new("jobs.critical.>").with_priority(3))
            .configure_job_stream("default", JobStreamConfig::new("jobs.default.>").with_priority(1))
            .build();

        let weights = registry.priority_weights();
        assert_eq!(weights.len(), 4);
        assert_eq!(weights.iter().filter(|s| s.as_str() == "critical").count(), 3);
        assert_eq!(weights.iter().filter(|s| s.as_str() == "default").count(), 1);
    }

    #[test]
    fn empty_when_no_job_streams_configured() {
        let registry = RegistryBuilder::new().build();
        assert!(registry.priority_weights().is_empty());
    }

    #[tokio::test]
    async fn resolve_job_handler_builds_fresh_instance_each_call() {
        let registry = RegistryBuilder::new()
            .register_job("EmailJob", || Arc::new(NoopJob))
            .build();

        assert!(registry.resolve_job_handler("EmailJob").is_some());
        assert!(registry.resolve_job_handler("Unknown").is_none());
    }
}
