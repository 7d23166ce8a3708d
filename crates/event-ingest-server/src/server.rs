// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::push::PushEndpoint;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use std::io;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long in-flight connections get to finish once the token is cancelled.
pub const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts connections until `cancel` fires, then waits up to [`CONNECTION_DRAIN_TIMEOUT`] for
/// open connections before aborting them.
pub async fn serve(
    listener: TcpListener,
    endpoint: PushEndpoint,
    cancel: CancellationToken,
) -> io::Result<()> {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = JoinSet::new();

    loop {
        let conn = tokio::select! {
            () = cancel.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Server error: {e}");
                    return Err(e);
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
        };

        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let endpoint = endpoint.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let endpoint = endpoint.clone();
            async move { endpoint.handle(req).await }
        });
        joinset.spawn(async move {
            if let Err(e) = server.serve_connection(conn, service).await {
                error!("Connection error: {e}");
            }
        });
    }

    info!("Stopped accepting connections, {} still open", joinset.len());
    let drained = tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, async {
        while joinset.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "Aborting {} connections still open after {:?}",
            joinset.len(),
            CONNECTION_DRAIN_TIMEOUT
        );
        joinset.shutdown().await;
    }
    debug!("HTTP server stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error setting up SIGINT handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Error setting up SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
