//! Backend-agnostic types for the Cosmo worker runtime: the job envelope
//! and its wire format, handler traits, the process-wide registry, and
//! error/retry primitives. No broker SDK dependency lives here — that is
//! `cosmo-worker`'s job.

pub mod backoff;
pub mod error;
pub mod job;
pub mod registry;

pub use error::{ErrorCategory, ProcessingError};
pub use job::{generate_jid, JobEnvelope, JobError, JobOptions, PublishParams};
pub use registry::{
    AckHandle, ConsumerSettings, JobHandler, JobHandlerFactory, JobStreamConfig, JsonSerializer,
    Registry, RegistryBuilder, Serializer, StartPosition, StreamHandler, StreamHandlerConfig,
    StreamHandlerFactory, StreamMessage, StreamMessageMeta,
};
