//! The job envelope: the unit of work enqueued on a jobs stream.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_retry() -> u32 {
    3
}

fn default_dead() -> bool {
    true
}

/// Construction-time options for a [`JobEnvelope`].
///
/// `stream` is the only required field; everything else falls back to the
/// envelope defaults (`retry = 3`, `dead = true`, no scheduling).
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub stream: Option<String>,
    pub subject: Option<String>,
    pub retry: Option<u32>,
    pub dead: Option<bool>,
    pub at: Option<DateTime<Utc>>,
    pub in_: Option<StdDuration>,
}

impl JobOptions {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: Some(stream.into()),
            ..Default::default()
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_dead(mut self, dead: bool) -> Self {
        self.dead = Some(dead);
        self
    }

    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.at = Some(when);
        self
    }

    pub fn in_(mut self, delay: StdDuration) -> Self {
        self.in_ = Some(delay);
        self
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job construction requires a stream")]
    MissingStream,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transport metadata that shapes `to_args()` but is never part of the
/// serialized wire body (`{jid, class, args, retry, dead}`).
#[derive(Debug, Clone, Default)]
struct Transport {
    stream: String,
    subject: Option<String>,
    execute_at: Option<DateTime<Utc>>,
}

/// Parameters a [`JobEnvelope`] carries for its publish call, backend-agnostic.
///
/// `cosmo-worker`'s `BrokerClient` translates `msg_id` into the broker's
/// dedup header (`Nats-Msg-Id` on NATS) and `stream` into the JetStream
/// publish option.
#[derive(Debug, Clone)]
pub struct PublishParams {
    pub stream: String,
    pub headers: HashMap<String, String>,
    pub msg_id: Option<String>,
}

/// A single job invocation: id, class tag, args, retry policy, scheduling
/// metadata. Serializes to the compact wire body
/// `{jid, class, args, retry, dead}`; scheduling and routing metadata live
/// outside the serialized form and are only consulted by `to_args()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub jid: String,
    pub class: String,
    pub args: Vec<serde_json::Value>,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_dead")]
    pub dead: bool,
    #[serde(skip)]
    transport: Transport,
}

impl JobEnvelope {
    /// Build a new envelope. Fails if `options.stream` is absent.
    pub fn build(
        class: impl Into<String>,
        args: Vec<serde_json::Value>,
        options: JobOptions,
    ) -> Result<Self, JobError> {
        let stream = options.stream.ok_or(JobError::MissingStream)?;
        let execute_at = options.at.or_else(|| {
            options
                .in_
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| Utc::now() + d)
        });

        Ok(Self {
            jid: generate_jid(),
            class: class.into(),
            args,
            retry: options.retry.unwrap_or_else(default_retry),
            dead: options.dead.unwrap_or_else(default_dead),
            transport: Transport {
                stream,
                subject: options.subject,
                execute_at,
            },
        })
    }

    pub fn jid(&self) -> &str {
        &self.jid
    }

    pub fn stream(&self) -> &str {
        &self.transport.stream
    }

    pub fn is_scheduled(&self) -> bool {
        self.transport.execute_at.is_some()
    }

    pub fn execute_at(&self) -> Option<DateTime<Utc>> {
        self.transport.execute_at
    }

    fn class_snake(&self) -> String {
        self.class.to_snake_case()
    }

    fn default_subject(&self) -> String {
        format!("jobs.{}.{}", self.transport.stream, self.class_snake())
    }

    /// The envelope's own subject (the one a fresh, non-scheduled publish
    /// uses; for a scheduled envelope this is the *target* subject carried
    /// in `X-Subject`, not the transport subject of the scheduled publish).
    pub fn target_subject(&self) -> String {
        self.transport
            .subject
            .clone()
            .unwrap_or_else(|| self.default_subject())
    }

    /// Produce `(subject, serialized body, publish params)` per the spec's
    /// immediate/scheduled split.
    pub fn to_args(&self) -> Result<(String, Vec<u8>, PublishParams), JobError> {
        let body = serde_json::to_vec(self)?;

        if let Some(execute_at) = self.transport.execute_at {
            let target_subject = self.target_subject();
            let subject = format!("jobs.scheduled.{}", self.class_snake());
            let mut headers = HashMap::new();
            headers.insert("X-Execute-At".to_string(), execute_at.timestamp().to_string());
            headers.insert("X-Stream".to_string(), self.transport.stream.clone());
            headers.insert("X-Subject".to_string(), target_subject);

            Ok((
                subject,
                body,
                PublishParams {
                    stream: "scheduled".to_string(),
                    headers,
                    msg_id: Some(self.jid.clone()),
                },
            ))
        } else {
            let subject = self.default_subject();
            Ok((
                subject,
                body,
                PublishParams {
                    stream: self.transport.stream.clone(),
                    headers: HashMap::new(),
                    msg_id: Some(self.jid.clone()),
                },
            ))
        }
    }
}

/// Summarizes an envelope without its `args` — safe to log at `info`.
/// `{:?}` (via the derived `Debug`) still includes `args` for `debug`-level
/// diagnostics, matching the teacher's habit of logging identifiers and
/// timing but not full payloads.
impl fmt::Display for JobEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JobEnvelope {{ jid: {}, class: {}, stream: {}, retry: {}, dead: {} }}",
            self.jid, self.class, self.transport.stream, self.retry, self.dead
        )
    }
}

/// Generate a 24-lowercase-hex-character job id.
///
/// Truncates a v4 UUID's simple hex form (32 chars) to the 24-char wire
/// contract `Nats-Msg-Id` dedup keys on.
pub fn generate_jid() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    raw[..24].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_stream_is_an_error() {
        let err = JobEnvelope::build("EmailJob", vec![], JobOptions::default());
        assert!(matches!(err, Err(JobError::MissingStream)));
    }

    #[test]
    fn jid_is_24_lowercase_hex_chars() {
        let jid = generate_jid();
        assert_eq!(jid.len(), 24);
        assert!(jid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn immediate_job_has_default_subject_and_headers() {
        let envelope = JobEnvelope::build(
            "EmailJob",
            vec![json!(42), json!("welcome")],
            JobOptions::new("default").with_retry(3).with_dead(true),
        )
        .unwrap();

        let (subject, body, params) = envelope.to_args().unwrap();
        assert_eq!(subject, "jobs.default.email_job");
        assert_eq!(params.stream, "default");
        assert_eq!(params.msg_id.as_deref(), Some(envelope.jid()));

        let decoded: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded["class"], "EmailJob");
        assert_eq!(decoded["args"], json!([42, "welcome"]));
        assert_eq!(decoded["retry"], 3);
        assert_eq!(decoded["dead"], true);
    }

    #[test]
    fn scheduled_job_transports_via_scheduled_stream() {
        let envelope = JobEnvelope::build(
            "EmailJob",
            vec![json!(1)],
            JobOptions::new("default").in_(StdDuration::from_secs(2)),
        )
        .unwrap();

        assert!(envelope.is_scheduled());
        let (subject, _, params) = envelope.to_args().unwrap();
        assert_eq!(subject, "jobs.scheduled.email_job");
        assert_eq!(params.stream, "scheduled");
        assert_eq!(params.headers["X-Stream"], "default");
        assert_eq!(params.headers["X-Subject"], "jobs.default.email_job");
        assert!(params.headers.contains_key("X-Execute-At"));
    }

    #[test]
    fn display_omits_args() {
        let envelope = JobEnvelope::build(
            "EmailJob",
            vec![json!("secret-payload")],
            JobOptions::new("default"),
        )
        .unwrap();

        assert!(!envelope.to_string().contains("secret-payload"));
        assert!(envelope.to_string().contains(envelope.jid()));
    }

    #[test]
    fn defaults_are_retry_3_dead_true() {
        let envelope =
            JobEnvelope::build("EmailJob", vec![], JobOptions::new("default")).unwrap();
        assert_eq!(envelope.retry, 3);
        assert!(envelope.dead);
    }

    #[test]
    fn serde_round_trip_preserves_wire_fields() {
        let envelope = JobEnvelope::build(
            "EmailJob",
            vec![json!(42), json!("welcome")],
            JobOptions::new("default"),
        )
        .unwrap();

        let body = serde_json::to_vec(&envelope).unwrap();
        let decoded: JobEnvelope = serde_json::from_slice(&body).unwrap();

        assert_eq!(decoded.jid, envelope.jid);
        assert_eq!(decoded.class, envelope.class);
        assert_eq!(decoded.args, envelope.args);
        assert_eq!(decoded.retry, envelope.retry);
        assert_eq!(decoded.dead, envelope.dead);
    }
}
