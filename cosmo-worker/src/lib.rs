//! The broker-facing runtime: the NATS JetStream client, bounded
//! concurrency pool, publisher, job and stream processors, the engine
//! lifecycle, and the ambient health/metrics surface. Depends on
//! `cosmo-core` for the envelope, handler traits, and registry.

pub mod broker;
pub mod engine;
pub mod error;
pub mod health;
pub mod job_processor;
pub mod metrics;
pub mod pool;
pub mod publisher;
pub mod settings;
pub mod stream_processor;

pub use broker::BrokerClient;
pub use engine::{Engine, ProcessorSelection};
pub use error::BrokerError;
pub use health::{HealthServer, HealthState, HealthStatus};
pub use job_processor::JobProcessor;
pub use pool::BoundedPool;
pub use publisher::Publisher;
pub use settings::{ConfigError, Environment, WorkerSettings};
pub use stream_processor::StreamProcessor;
