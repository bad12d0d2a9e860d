//! Thin handle over the broker SDK: publish, pull-consumer ensure+bind,
//! stream introspection. Grounded on `nats-worker::consumer.rs`'s
//! `ensure_stream`/`ensure_consumer` and `nats-worker::producer.rs`'s
//! `send`. SDK errors are propagated unchanged; only [`crate::publisher::Publisher`]
//! translates a not-found response into a domain error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, Consumer, DeliverPolicy};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::Context;
use async_nats::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::BrokerError;

/// Durable pull-consumer settings, broker-agnostic shape mirrored onto
/// `async_nats`'s pull config.
#[derive(Debug, Clone)]
pub struct SubscribeConfig {
    pub subjects: Vec<String>,
    pub max_deliver: i64,
    pub max_ack_pending: i64,
    pub ack_wait: Duration,
    pub deliver_policy: DeliverPolicy,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            subjects: Vec::new(),
            max_deliver: 5,
            max_ack_pending: 1000,
            ack_wait: Duration::from_secs(30),
            deliver_policy: DeliverPolicy::All,
        }
    }
}

/// Result of a broker publish: the broker-assigned sequence and whether
/// the broker recognized this as a duplicate of a prior `Nats-Msg-Id`.
#[derive(Debug, Clone, Copy)]
pub struct PublishAck {
    pub sequence: u64,
    pub duplicate: bool,
}

/// Parameters accepted by [`BrokerClient::publish`] beyond subject/payload.
#[derive(Debug, Clone, Default)]
pub struct PublishParams {
    pub headers: HashMap<String, String>,
    pub msg_id: Option<String>,
    pub expected_stream: Option<String>,
}

/// Minimal stream introspection surface, mirroring `nats-worker::consumer::StreamInfo`.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: String,
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: i64,
}

/// Singleton handle over a JetStream context.
#[derive(Clone)]
pub struct BrokerClient {
    jetstream: Arc<Context>,
}

impl BrokerClient {
    pub fn new(jetstream: Context) -> Self {
        Self {
            jetstream: Arc::new(jetstream),
        }
    }

    pub fn context(&self) -> Arc<Context> {
        self.jetstream.clone()
    }

    /// Synchronous publish with broker ack. `params.headers`/`msg_id`/
    /// `expected_stream` map onto NATS headers (`Nats-Msg-Id`,
    /// `Nats-Expected-Stream`).
    pub async fn publish(
        &self,
        subject: impl Into<String>,
        payload: Vec<u8>,
        params: PublishParams,
    ) -> Result<PublishAck, BrokerError> {
        let subject = subject.into();
        let has_headers = !params.headers.is_empty()
            || params.msg_id.is_some()
            || params.expected_stream.is_some();

        let ack_future = if has_headers {
            let mut headers = HeaderMap::new();
            for (k, v) in &params.headers {
                headers.insert(k.as_str(), v.as_str());
            }
            if let Some(msg_id) = &params.msg_id {
                headers.insert("Nats-Msg-Id", msg_id.as_str());
            }
            if let Some(stream) = &params.expected_stream {
                headers.insert("Nats-Expected-Stream", stream.as_str());
            }
            self.jetstream
                .publish_with_headers(subject.clone(), headers, Bytes::from(payload))
                .await
        } else {
            self.jetstream
                .publish(subject.clone(), Bytes::from(payload))
                .await
        };

        let ack = ack_future
            .map_err(|e| BrokerError::publish_error(e.to_string()))?
            .await
            .map_err(|e| BrokerError::publish_error(e.to_string()))?;

        debug!(subject = %subject, sequence = ack.sequence, duplicate = ack.duplicate, "published message");

        Ok(PublishAck {
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    /// Creates or binds a durable pull consumer on `stream`.
    pub async fn subscribe(
        &self,
        stream: &str,
        consumer_name: &str,
        config: SubscribeConfig,
    ) -> Result<Consumer<PullConfig>, BrokerError> {
        let stream_handle = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(BrokerError::from_jetstream_error)?;

        match stream_handle
            .get_consumer::<PullConfig>(consumer_name)
            .await
        {
            Ok(consumer) => {
                debug!(consumer = %consumer_name, stream = %stream, "consumer already bound");
                Ok(consumer)
            }
            Err(_) => {
                info!(consumer = %consumer_name, stream = %stream, "creating pull consumer");
                let filter_subjects = config.subjects.clone();
                let consumer = stream_handle
                    .create_consumer(PullConfig {
                        durable_name: Some(consumer_name.to_string()),
                        name: Some(consumer_name.to_string()),
                        ack_policy: AckPolicy::Explicit,
                        ack_wait: config.ack_wait,
                        max_deliver: config.max_deliver,
                        max_ack_pending: config.max_ack_pending,
                        filter_subjects,
                        deliver_policy: config.deliver_policy,
                        ..Default::default()
                    })
                    .await
                    .map_err(BrokerError::from_jetstream_error)?;
                Ok(consumer)
            }
        }
    }

    /// Idempotent stream creation: a no-op if the stream already exists.
    pub async fn ensure_stream(
        &self,
        name: &str,
        subjects: Vec<String>,
        max_age: Duration,
    ) -> Result<(), BrokerError> {
        match self.jetstream.get_stream(name).await {
            Ok(_) => {
                debug!(stream = %name, "stream already exists");
                Ok(())
            }
            Err(_) => {
                info!(stream = %name, "creating stream");
                self.jetstream
                    .create_stream(StreamConfig {
                        name: name.to_string(),
                        subjects,
                        max_age,
                        ..Default::default()
                    })
                    .await
                    .map_err(BrokerError::from_jetstream_error)?;
                Ok(())
            }
        }
    }

    pub async fn stream_info(&self, name: &str) -> Result<StreamInfo, BrokerError> {
        let mut stream = self
            .jetstream
            .get_stream(name)
            .await
            .map_err(BrokerError::from_jetstream_error)?;
        let info = stream.info().await.map_err(BrokerError::from_jetstream_error)?;
        Ok(StreamInfo {
            name: name.to_string(),
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count as i64,
        })
    }

    pub async fn list_streams(&self) -> Result<Vec<String>, BrokerError> {
        use futures::TryStreamExt;
        let names: Vec<String> = self
            .jetstream
            .stream_names()
            .try_collect()
            .await
            .map_err(BrokerError::from_jetstream_error)?;
        Ok(names)
    }

    pub async fn delete_stream(&self, name: &str) -> Result<(), BrokerError> {
        self.jetstream
            .delete_stream(name)
            .await
            .map_err(BrokerError::from_jetstream_error)?;
        Ok(())
    }

    pub async fn get_message(&self, stream: &str, sequence: u64) -> Result<Vec<u8>, BrokerError> {
        let mut stream_handle = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(BrokerError::from_jetstream_error)?;
        let message = stream_handle
            .get_raw_message(sequence)
            .await
            .map_err(BrokerError::from_jetstream_error)?;
        Ok(message.payload.to_vec())
    }
}

/// Translates a spec-level `start_position` into the broker's deliver
/// policy table (spec.md §4.6): `first -> all`, `last -> last`,
/// `new -> new`, timestamp -> `by_start_time`.
pub fn deliver_policy_for(start: &cosmo_core::StartPosition) -> DeliverPolicy {
    match start {
        cosmo_core::StartPosition::First => DeliverPolicy::All,
        cosmo_core::StartPosition::Last => DeliverPolicy::Last,
        cosmo_core::StartPosition::New => DeliverPolicy::New,
        cosmo_core::StartPosition::Timestamp(ts) => DeliverPolicy::ByStartTime {
            start_time: to_offset_date_time(*ts),
        },
    }
}

/// The SDK's deliver-policy timestamp is `time::OffsetDateTime`, not
/// `chrono::DateTime`; round-trip through RFC3339 to bridge the two.
fn to_offset_date_time(ts: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::parse(&ts.to_rfc3339(), &time::format_description::well_known::Rfc3339)
        .expect("chrono RFC3339 output is always valid RFC3339")
}

/// The reverse bridge: a delivered message's `Info::published` is a
/// `time::OffsetDateTime`; stream metadata and logging want `chrono::DateTime<Utc>`.
pub fn to_chrono_date_time(ts: time::OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.unix_timestamp(), ts.nanosecond()).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_policy_table_matches_spec() {
        assert!(matches!(
            deliver_policy_for(&cosmo_core::StartPosition::First),
            DeliverPolicy::All
        ));
        assert!(matches!(
            deliver_policy_for(&cosmo_core::StartPosition::Last),
            DeliverPolicy::Last
        ));
        assert!(matches!(
            deliver_policy_for(&cosmo_core::StartPosition::New),
            DeliverPolicy::New
        ));
        let ts = Utc::now();
        assert!(matches!(
            deliver_policy_for(&cosmo_core::StartPosition::Timestamp(ts)),
            DeliverPolicy::ByStartTime { .. }
        ));
    }
}
