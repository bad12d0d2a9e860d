//! Example handlers wired into `cosmo-engine`'s `register()` hook and
//! exercised by this workspace's own integration tests.
//!
//! Grounded on the teacher's doc-comment `EmailJob` (`messaging::job`) and
//! its `TaskEventHandler` (`apps/zerg/nats-worker::handlers::task_events`),
//! adapted from the teacher's typed `Job`/`Processor` pair and per-subject
//! `match` dispatch to this runtime's dynamic `class` tag and batch-oriented
//! `StreamHandler`.

pub mod email_job;
pub mod click_events;

use std::sync::Arc;

use cosmo_core::{JobStreamConfig, RegistryBuilder, StartPosition, StreamHandlerConfig};

use crate::click_events::ClickEventsHandler;
use crate::email_job::EmailJob;

/// Registers every example handler and its default stream/consumer
/// configuration. Called once, before `Engine::run`, from `cosmo-engine`'s
/// `main`.
pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register_job("EmailJob", || Arc::new(EmailJob))
        .configure_job_stream("default", JobStreamConfig::new("jobs.default.>").with_priority(1))
        .register_stream(
            StreamHandlerConfig::new(
                "events",
                "consumer-click-events",
                vec!["events.clicks.>".to_string()],
                || Arc::new(ClickEventsHandler::default()),
            )
            .with_batch_size(100)
            .with_start_position(StartPosition::New),
        )
}
