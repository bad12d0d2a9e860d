//! Publishes envelopes and arbitrary payloads to the broker.
//!
//! Grounded on `nats-worker::producer::NatsProducer::send`, generalized
//! from a typed `Job` to the envelope's dynamic `to_args()`. The Open
//! Question of whether `publish` returns a bare success flag or the full
//! ack is resolved in favor of the richer [`PublishAck`] — callers that
//! only want success can call `.is_ok()` on the result.

use cosmo_core::{JobEnvelope, Serializer};
use tracing::debug;

use crate::broker::{BrokerClient, PublishAck, PublishParams as BrokerPublishParams};
use crate::error::BrokerError;

/// Publishes envelopes and raw payloads through a [`BrokerClient`].
pub struct Publisher {
    broker: BrokerClient,
    serializer: std::sync::Arc<dyn Serializer>,
}

impl Publisher {
    pub fn new(broker: BrokerClient, serializer: std::sync::Arc<dyn Serializer>) -> Self {
        Self { broker, serializer }
    }

    /// Serializes `data` with the configured serializer (default JSON)
    /// and publishes it to `subject`. Broker errors propagate unchanged.
    pub async fn publish(
        &self,
        subject: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<PublishAck, BrokerError> {
        let payload = self.serializer.encode(&data)?;
        self.broker
            .publish(subject, payload, BrokerPublishParams::default())
            .await
    }

    /// Publishes a job envelope to its resolved target (`jobs.<stream>.<class>`
    /// or the `scheduled` stream), returning the envelope's `jid`.
    ///
    /// Translates a broker `NoStreamResponse`-shaped failure into
    /// [`BrokerError::StreamNotFound`] per spec.md §4.3.
    pub async fn publish_job(&self, envelope: &JobEnvelope) -> Result<String, BrokerError> {
        let (subject, body, params) = envelope
            .to_args()
            .map_err(|e| BrokerError::publish_error(e.to_string()))?;

        let broker_params = BrokerPublishParams {
            headers: params.headers,
            msg_id: params.msg_id,
            expected_stream: Some(params.stream.clone()),
        };

        match self.broker.publish(subject, body, broker_params).await {
            Ok(ack) => {
                debug!(jid = %envelope.jid(), sequence = ack.sequence, duplicate = ack.duplicate, "published job");
                Ok(envelope.jid().to_string())
            }
            Err(err) if err.is_no_stream_response() => {
                Err(BrokerError::StreamNotFound(params.stream))
            }
            Err(err) => Err(err),
        }
    }

    /// Publishes `payload` to `subject` unchanged — no serializer round-trip.
    /// Used for dead-lettering, where spec.md §7 requires the DLQ body to be
    /// "identical in body to the original": decoding to a `serde_json::Value`
    /// and re-encoding it would silently reorder object keys.
    pub async fn publish_raw(
        &self,
        subject: impl Into<String>,
        payload: Vec<u8>,
        msg_id: Option<String>,
    ) -> Result<PublishAck, BrokerError> {
        self.broker
            .publish(
                subject,
                payload,
                BrokerPublishParams {
                    msg_id,
                    ..Default::default()
                },
            )
            .await
    }

    /// Publishes every item to `subject` in sequence. Not transactional:
    /// a failure partway through leaves earlier items published.
    pub async fn publish_batch(
        &self,
        subject: impl Into<String>,
        items: Vec<serde_json::Value>,
    ) -> Result<Vec<PublishAck>, BrokerError> {
        let subject = subject.into();
        let mut acks = Vec::with_capacity(items.len());
        for item in items {
            let ack = self.publish(subject.clone(), item).await?;
            acks.push(ack);
        }
        Ok(acks)
    }
}

#[cfg(test)]
mod tests {
    // Real tests require a NATS server; see cosmo-worker's ignored
    // integration tests for broker-backed publish coverage.
}
