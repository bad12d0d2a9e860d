//! Process entry point for the Cosmo worker runtime.
//!
//! Grounded on the teacher's `apps/zerg/nats-worker::main` (init tracing,
//! load config, connect, construct and run) — generalized from one
//! hard-wired handler to `demos::register()`'s handful of example
//! handlers, since this binary stands in for the out-of-scope "Process
//! CLI surface" collaborator only to the extent of wiring (no `clap`
//! subcommand tree, no YAML config loader; see spec.md §1 Out of scope
//! and SPEC_FULL.md's cosmo-engine module note).
//!
//! Accepts at most one positional argument selecting which processors to
//! run: `jobs`, `streams`, or nothing (both) — the systems-language stand-in
//! for the source CLI's `jobs`/`streams`/no-command surface.

use std::env;

use cosmo_core::RegistryBuilder;
use cosmo_worker::broker::BrokerClient;
use cosmo_worker::engine::{Engine, ProcessorSelection};
use cosmo_worker::publisher::Publisher;
use cosmo_worker::settings::{init_tracing, Environment, WorkerSettings};
use eyre::Result;
use tracing::info;

fn parse_selection() -> ProcessorSelection {
    match env::args().nth(1).as_deref() {
        Some("jobs") => ProcessorSelection::Jobs,
        Some("streams") => ProcessorSelection::Streams,
        _ => ProcessorSelection::Both,
    }
}

fn parse_concurrency() -> usize {
    env::var("COSMO_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let environment = Environment::from_env();
    init_tracing(environment);

    let settings = WorkerSettings::from_env()?;
    info!(nats_url = %settings.nats_url, "starting cosmo-engine");

    let client = async_nats::connect(&settings.nats_url).await?;
    let jetstream = async_nats::jetstream::new(client);
    let broker = BrokerClient::new(jetstream);

    let registry = demos::register(RegistryBuilder::new()).build();
    let publisher = std::sync::Arc::new(Publisher::new(
        broker.clone(),
        std::sync::Arc::new(cosmo_core::JsonSerializer),
    ));

    let selection = parse_selection();
    let concurrency = parse_concurrency();
    info!(?selection, concurrency, "registry built, starting engine");

    let engine = Engine::new(broker, registry, publisher, settings, concurrency, selection);
    engine.run().await?;

    info!("cosmo-engine shut down cleanly");
    Ok(())
}
