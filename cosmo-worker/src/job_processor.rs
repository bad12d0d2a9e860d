//! The job message pump: setup, the shuffled weighted work loop, failure
//! handling, and the delayed-execution scheduler loop.
//!
//! Grounded on `messaging::nats::worker::NatsWorker` (batch fetch, concurrent
//! dispatch, ack/nak/term, DLQ) and `nats-worker::consumer.rs` (`ensure_stream`/
//! `ensure_consumer`/`fetch`), generalized from a single typed `Job`/`Processor`
//! pair to the envelope's dynamic `class` dispatch against the registry, and
//! from per-category backoff to the spec's uniform `(attempt^4 + 15)` formula
//! — see `cosmo_core::backoff` and `DESIGN.md` for that divergence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{Consumer, DeliverPolicy};
use async_nats::jetstream::AckKind;
use chrono::{TimeZone, Utc};
use cosmo_core::{JobEnvelope, Registry};
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::broker::BrokerClient;
use crate::error::BrokerError;
use crate::metrics::JobMetrics;
use crate::pool::BoundedPool;
use crate::publisher::Publisher;

const SCHEDULED_STREAM: &str = "scheduled";
const SCHEDULED_CONSUMER: &str = "consumer-scheduled";
const SCHEDULED_BATCH: usize = 100;

/// Drives both the job work loop and the scheduler loop.
pub struct JobProcessor {
    broker: BrokerClient,
    pool: Arc<BoundedPool>,
    registry: Arc<Registry>,
    publisher: Arc<Publisher>,
    metrics: JobMetrics,
    jobs_fetch_timeout: Duration,
    scheduler_fetch_timeout: Duration,
}

impl JobProcessor {
    pub fn new(
        broker: BrokerClient,
        pool: Arc<BoundedPool>,
        registry: Arc<Registry>,
        publisher: Arc<Publisher>,
        jobs_fetch_timeout: Duration,
        scheduler_fetch_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            pool,
            registry,
            publisher,
            metrics: JobMetrics,
            jobs_fetch_timeout,
            scheduler_fetch_timeout,
        }
    }

    /// Creates a `consumer-<stream>` pull consumer for every entry under
    /// `registry.jobs()`. A no-op (does not start anything) if none are
    /// configured.
    async fn setup(&self) -> Result<HashMap<String, Consumer<PullConfig>>, BrokerError> {
        let mut consumers = HashMap::new();
        for (stream, config) in self.registry.jobs() {
            self.broker
                .ensure_stream(
                    stream,
                    vec![config.subject.clone()],
                    Duration::from_secs(7 * 24 * 60 * 60),
                )
                .await?;

            let consumer_name = format!("consumer-{stream}");
            let consumer = self
                .broker
                .subscribe(
                    stream,
                    &consumer_name,
                    crate::broker::SubscribeConfig {
                        subjects: vec![config.subject.clone()],
                        max_deliver: config.consumer.max_deliver,
                        max_ack_pending: config.consumer.max_ack_pending,
                        ack_wait: config.consumer.ack_wait,
                        deliver_policy: DeliverPolicy::All,
                    },
                )
                .await?;

            consumers.insert(stream.clone(), consumer);
        }
        Ok(consumers)
    }

    /// Runs until `running` reports `false`. Does nothing if no job streams
    /// are registered.
    pub async fn run_work_loop(&self, mut running: watch::Receiver<bool>) -> Result<(), BrokerError> {
        if self.registry.priority_weights().is_empty() {
            info!("no job streams registered, job processor work loop not starting");
            return Ok(());
        }

        let consumers = self.setup().await?;
        let mut rng = rand::rng();

        'outer: loop {
            if !*running.borrow() {
                break;
            }

            let mut shuffled: Vec<String> = self.registry.priority_weights().to_vec();
            shuffled.shuffle(&mut rng);

            for stream in shuffled {
                if !*running.borrow() {
                    break 'outer;
                }

                let Some(consumer) = consumers.get(&stream).cloned() else {
                    continue;
                };

                let processor = self.clone_for_task();
                let stream_name = stream.clone();
                let timeout = self.jobs_fetch_timeout;

                let submitted = self
                    .pool
                    .post(async move {
                        if let Err(err) = processor.fetch_and_process(&stream_name, consumer, timeout).await {
                            error!(stream = %stream_name, error = %err, "job fetch/process failed");
                        }
                    })
                    .await;

                if submitted.is_err() {
                    info!("pool rejected submission, job work loop stopping");
                    break 'outer;
                }
            }
        }

        Ok(())
    }

    /// Cheap clone for moving into spawned pool tasks.
    fn clone_for_task(&self) -> Arc<JobProcessorTask> {
        Arc::new(JobProcessorTask {
            registry: self.registry.clone(),
            publisher: self.publisher.clone(),
            metrics: self.metrics,
        })
    }

    /// The scheduler loop: promotes due scheduled envelopes onto their
    /// target stream/subject. Runs until `running` reports `false`.
    pub async fn run_scheduler_loop(&self, mut running: watch::Receiver<bool>) -> Result<(), BrokerError> {
        self.broker
            .ensure_stream(
                SCHEDULED_STREAM,
                vec!["jobs.scheduled.>".to_string()],
                Duration::from_secs(7 * 24 * 60 * 60),
            )
            .await?;

        let consumer = self
            .broker
            .subscribe(
                SCHEDULED_STREAM,
                SCHEDULED_CONSUMER,
                crate::broker::SubscribeConfig {
                    subjects: vec!["jobs.scheduled.>".to_string()],
                    max_deliver: -1,
                    max_ack_pending: 1000,
                    ack_wait: Duration::from_secs(30),
                    deliver_policy: DeliverPolicy::All,
                },
            )
            .await?;

        loop {
            if !*running.borrow() {
                break;
            }

            let mut messages = match consumer
                .fetch()
                .max_messages(SCHEDULED_BATCH)
                .expires(self.scheduler_fetch_timeout)
                .messages()
                .await
            {
                Ok(m) => m,
                Err(err) => {
                    warn!(error = %err, "scheduler fetch failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(msg) = messages.next().await {
                let message = match msg {
                    Ok(m) => m,
                    Err(err) => {
                        warn!(error = %err, "error receiving scheduled message");
                        continue;
                    }
                };

                if let Err(err) = self.promote_if_due(&message).await {
                    warn!(error = %err, "failed to promote scheduled message");
                }
            }
        }

        Ok(())
    }

    async fn promote_if_due(&self, message: &async_nats::jetstream::Message) -> Result<(), BrokerError> {
        let headers = message.headers.clone().unwrap_or_default();

        let execute_at = headers
            .get("X-Execute-At")
            .and_then(|v| v.to_string().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        let target_stream = headers.get("X-Stream").map(|v| v.to_string());
        let target_subject = headers.get("X-Subject").map(|v| v.to_string());

        let (Some(execute_at), Some(target_stream), Some(target_subject)) =
            (execute_at, target_stream, target_subject)
        else {
            warn!("scheduled message missing required headers, terminating");
            message
                .ack_with(AckKind::Term)
                .await
                .map_err(|e| BrokerError::consumer_error(e.to_string()))?;
            return Ok(());
        };

        let now = Utc::now();
        if now >= execute_at {
            let mut user_headers = crate::broker::PublishParams::default();
            for (name, values) in headers.iter() {
                let name_str = name.to_string();
                if matches!(
                    name_str.as_str(),
                    "X-Execute-At" | "X-Stream" | "X-Subject" | "Nats-Expected-Stream"
                ) {
                    continue;
                }
                user_headers.headers.insert(name_str, values.to_string());
            }
            user_headers.expected_stream = Some(target_stream);

            self.broker
                .publish(target_subject, message.payload.to_vec(), user_headers)
                .await?;

            message
                .ack()
                .await
                .map_err(|e| BrokerError::consumer_error(e.to_string()))?;
        } else {
            let delay = (execute_at - now)
                .to_std()
                .unwrap_or(Duration::from_secs(0));
            message
                .ack_with(AckKind::Nak(Some(delay)))
                .await
                .map_err(|e| BrokerError::consumer_error(e.to_string()))?;
        }

        Ok(())
    }
}

/// The per-task half of `JobProcessor`: everything a spawned pool task
/// needs, cloned cheaply via `Arc` fields.
struct JobProcessorTask {
    registry: Arc<Registry>,
    publisher: Arc<Publisher>,
    metrics: JobMetrics,
}

impl JobProcessorTask {
    async fn fetch_and_process(
        &self,
        stream: &str,
        consumer: Consumer<PullConfig>,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let mut messages = consumer
            .fetch()
            .max_messages(1)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| BrokerError::consumer_error(e.to_string()))?;

        if let Some(msg) = messages.next().await {
            let message = msg.map_err(|e| BrokerError::consumer_error(e.to_string()))?;
            self.metrics.job_received(stream);
            self.process(stream, message).await;
        }

        Ok(())
    }

    async fn process(&self, stream: &str, message: async_nats::jetstream::Message) {
        let envelope: JobEnvelope = match serde_json::from_slice(&message.payload) {
            Ok(e) => e,
            Err(err) => {
                error!(stream = %stream, error = %err, "malformed job payload, leaving unacked");
                return;
            }
        };

        let span = tracing::info_span!(
            "job",
            jid = %envelope.jid(),
            class = %envelope.class,
            stream = %stream,
        );

        async {
            let Some(handler) = self.registry.resolve_job_handler(&envelope.class) else {
                warn!(class = %envelope.class, "no handler registered for class, leaving unacked");
                return;
            };

            let start = Instant::now();
            let result = handler.perform(envelope.jid(), &envelope.args).await;
            let elapsed = start.elapsed();

            match result {
                Ok(()) => {
                    if let Err(err) = message.ack().await {
                        error!(error = %err, "failed to ack successfully processed job");
                    }
                    self.metrics.job_processed(stream, &envelope.class, elapsed);
                    debug!(duration_ms = elapsed.as_millis(), "job processed");
                }
                Err(err) => {
                    self.metrics
                        .job_failed(stream, &envelope.class, &err.category().to_string());
                    self.handle_failure(stream, &message, &envelope, &err).await;
                }
            }
        }
        .instrument(span)
        .await;
    }

    async fn handle_failure(
        &self,
        stream: &str,
        message: &async_nats::jetstream::Message,
        envelope: &JobEnvelope,
        err: &cosmo_core::ProcessingError,
    ) {
        let attempt = message
            .info()
            .map(|info| info.delivered as u32)
            .unwrap_or(1);
        let max_attempts = envelope.retry + 1;

        if cosmo_core::backoff::should_retry(attempt, envelope.retry) {
            let delay = cosmo_core::backoff::nak_delay(attempt);
            warn!(
                jid = %envelope.jid(),
                attempt,
                max_attempts,
                delay_secs = delay.as_secs(),
                error = %err,
                "job failed, retrying"
            );
            self.metrics.job_retried(stream, &envelope.class);
            if let Err(e) = message.ack_with(AckKind::Nak(Some(delay))).await {
                error!(error = %e, "failed to nak job for retry");
            }
            return;
        }

        if envelope.dead {
            let class_snake = heck::ToSnakeCase::to_snake_case(envelope.class.as_str());
            let dead_subject = format!("jobs.dead.{class_snake}");
            warn!(jid = %envelope.jid(), "retries exhausted, dead-lettering");

            match self
                .publisher
                .publish_raw(dead_subject, message.payload.to_vec(), Some(envelope.jid().to_string()))
                .await
            {
                Ok(_) => {
                    self.metrics.job_dead_lettered(stream, &envelope.class);
                    if let Err(e) = message.ack().await {
                        error!(error = %e, "failed to ack dead-lettered job");
                    }
                }
                Err(e) => error!(error = %e, "failed to publish to dead-letter subject, leaving unacked"),
            }
        } else {
            warn!(jid = %envelope.jid(), "retries exhausted, terminating");
            if let Err(e) = message.ack_with(AckKind::Term).await {
                error!(error = %e, "failed to term exhausted job");
            }
        }
    }
}
