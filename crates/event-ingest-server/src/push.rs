// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::http_utils::{
    create_json_response, log_and_create_http_response, verify_request_content_length,
    HttpResponse,
};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use event_ingest::batch_service::{BatchHandle, EnqueueOutcome};
use event_ingest::intake::{collect_entries, PushRequest};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{http, Method, Request, Response, StatusCode};
use serde_json::json;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const PUSH_ENDPOINT_PATH: &str = "/loki/api/v1/push";
pub const HEALTH_ENDPOINT_PATH: &str = "/loki/api/v1/health";
pub const ROOT_HEALTH_ENDPOINT_PATH: &str = "/health";
pub const INFO_ENDPOINT_PATH: &str = "/loki/api/v1/info";
pub const SERVICE_NAME: &str = "event-ingest";

const PUSH_ERROR_PREFIX: &str = "Error processing push request";

/// Request handler shared by every connection.
#[derive(Clone)]
pub struct PushEndpoint {
    handle: BatchHandle,
    accepting: Arc<AtomicBool>,
    max_request_bytes: usize,
}

impl PushEndpoint {
    #[must_use]
    pub fn new(handle: BatchHandle, max_request_bytes: usize) -> Self {
        Self {
            handle,
            accepting: Arc::new(AtomicBool::new(true)),
            max_request_bytes,
        }
    }

    /// Pushes received after this answer `503`. Health checks keep working.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire) && self.handle.is_running()
    }

    pub async fn handle<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        match (req.method(), req.uri().path()) {
            (&Method::POST, PUSH_ENDPOINT_PATH) => self.push_handler(req).await,
            (&Method::GET, HEALTH_ENDPOINT_PATH | ROOT_HEALTH_ENDPOINT_PATH) => health_handler(),
            (&Method::GET, INFO_ENDPOINT_PATH) => self.info_handler(),
            (_, PUSH_ENDPOINT_PATH) => log_and_create_http_response(
                &format!("Method {} not allowed on {PUSH_ENDPOINT_PATH}", req.method()),
                StatusCode::METHOD_NOT_ALLOWED,
            ),
            _ => {
                let mut not_found = Response::default();
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    async fn push_handler<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        if !self.is_accepting() {
            return log_and_create_http_response(
                &format!("{PUSH_ERROR_PREFIX}: shutting down, not accepting entries"),
                StatusCode::SERVICE_UNAVAILABLE,
            );
        }
        if let Some(response) =
            verify_request_content_length(req.headers(), self.max_request_bytes, PUSH_ERROR_PREFIX)
        {
            return response;
        }

        let body = match Limited::new(req.into_body(), self.max_request_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return log_and_create_http_response(
                    &format!("{PUSH_ERROR_PREFIX}: Payload too large"),
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            Err(e) => {
                return log_and_create_http_response(
                    &format!("{PUSH_ERROR_PREFIX}: failed to read body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let request: PushRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("{PUSH_ERROR_PREFIX}: Invalid JSON format: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };
        if request.streams.is_empty() {
            return log_and_create_http_response(
                &format!("{PUSH_ERROR_PREFIX}: No streams provided"),
                StatusCode::BAD_REQUEST,
            );
        }

        let (entries, summary) = collect_entries(request.streams);
        if entries.is_empty() {
            debug!("Push request carried no valid entries: {summary:?}");
            return success(0);
        }

        match self.handle.enqueue(entries).await {
            Ok(EnqueueOutcome::Accepted { queued }) => {
                debug!(
                    "Accepted {} entries from {} streams, skipped {} duplicates and {} malformed, \
                     {queued} queued",
                    summary.accepted, summary.streams, summary.duplicates, summary.malformed
                );
                success(summary.accepted)
            }
            Ok(EnqueueOutcome::Rejected { dropped }) => log_and_create_http_response(
                &format!("{PUSH_ERROR_PREFIX}: queue full, dropped {dropped} entries"),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            Err(e) => log_and_create_http_response(
                &format!("{PUSH_ERROR_PREFIX}: {e}"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    }

    fn info_handler(&self) -> http::Result<HttpResponse> {
        let body = json!({
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "accepting": self.is_accepting(),
            "queued": self.handle.queued(),
            "endpoints": {
                "push": PUSH_ENDPOINT_PATH,
                "health": HEALTH_ENDPOINT_PATH,
                "info": INFO_ENDPOINT_PATH,
            },
        });
        create_json_response(&body, StatusCode::OK)
    }
}

fn success(entries: usize) -> http::Result<HttpResponse> {
    create_json_response(
        &json!({ "message": "success", "entries": entries }),
        StatusCode::OK,
    )
}

fn health_handler() -> http::Result<HttpResponse> {
    let body = json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "service": SERVICE_NAME,
    });
    create_json_response(&body, StatusCode::OK)
}
