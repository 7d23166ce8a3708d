// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::{bail, Context};
use clap::Parser;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use event_ingest::batch_service::BatchService;
use event_ingest::schema::SchemaRegistry;
use event_ingest_postgres::PostgresStore;
use event_ingest_server::{
    cli::ServerArgs,
    config::ServerConfig,
    push::{PushEndpoint, HEALTH_ENDPOINT_PATH, PUSH_ENDPOINT_PATH, ROOT_HEALTH_ENDPOINT_PATH},
    server::{self, shutdown_signal},
};

const LISTEN_HOST: [u8; 4] = [0, 0, 0, 0];

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load(ServerArgs::parse());

    let env_filter = format!("h2=off,hyper=off,tokio_postgres=warn,{}", config.log_level);
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&env_filter)
                .with_context(|| format!("could not parse log level {:?}", config.log_level))?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    if let Err(e) = run(config).await {
        error!("Event ingest server failed: {e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;

    let registry = SchemaRegistry::load_dir(&config.schema_dir).with_context(|| {
        format!(
            "Failed to load table descriptors from {}",
            config.schema_dir.display()
        )
    })?;
    let registry = Arc::new(registry);

    let store = PostgresStore::new(&config.postgres()).context("Failed to configure PostgreSQL")?;
    store.ping().await.context("PostgreSQL is unreachable")?;
    store
        .provision(&registry)
        .await
        .context("Failed to provision tables")?;

    let (service, handle) = BatchService::new(&config.ingest, Arc::clone(&registry), Arc::new(store));
    let mut worker = tokio::spawn(service.run());

    let addr = SocketAddr::from((LISTEN_HOST, config.port));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let endpoint = PushEndpoint::new(handle.clone(), config.max_request_bytes);
    let cancel = CancellationToken::new();
    let mut server_task = tokio::spawn(server::serve(listener, endpoint.clone(), cancel.clone()));

    info!(
        "Event ingest server listening on {addr}: environment={} batch_size={} flush_interval={}s \
         max_queue_size={} destinations={} fallback_table={} \
         endpoints=[POST {PUSH_ENDPOINT_PATH}, GET {HEALTH_ENDPOINT_PATH}, GET {ROOT_HEALTH_ENDPOINT_PATH}]",
        config.environment,
        config.ingest.batch_size,
        config.ingest.flush_interval.as_secs(),
        config.ingest.max_queue_size,
        registry.len(),
        config.fallback_table
    );

    let server_exit = tokio::select! {
        () = shutdown_signal() => None,
        result = &mut server_task => Some(result),
        result = &mut worker => bail!("Batch worker exited unexpectedly: {result:?}"),
    };

    info!("Shutting down, refusing new pushes");
    endpoint.stop_accepting();
    cancel.cancel();
    let server_result = match server_exit {
        Some(result) => server_outcome(result),
        None => server_outcome(server_task.await),
    };

    let report = handle
        .shutdown()
        .await
        .context("Final flush did not complete")?;
    info!(
        "Final flush drained {} entries: {} persisted, {} to fallback, {} duplicates, {} lost",
        report.drained,
        report.written.persisted,
        report.written.fallback,
        report.written.duplicates,
        report.written.lost
    );
    if let Err(e) = worker.await {
        error!("Batch worker failed during shutdown: {e}");
    }

    server_result
}

fn server_outcome(result: Result<io::Result<()>, JoinError>) -> anyhow::Result<()> {
    result
        .context("HTTP server task failed")?
        .context("HTTP server stopped unexpectedly")
}
