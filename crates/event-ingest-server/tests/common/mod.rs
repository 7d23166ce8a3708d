// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixtures for the push endpoint tests

pub mod mocks;

use bytes::Bytes;
use event_ingest::batch_service::{BatchHandle, BatchService};
use event_ingest::config::IngestConfig;
use event_ingest::schema::{SchemaRegistry, TableDescriptor};
use event_ingest_server::push::PushEndpoint;
use http_body_util::{BodyExt, Full};
use hyper::{header, Method, Request, Response};
use mocks::GatedStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const MAX_REQUEST_BYTES: usize = 4096;

pub struct Harness {
    pub endpoint: PushEndpoint,
    pub handle: BatchHandle,
    pub store: Arc<GatedStore>,
}

pub fn start(batch_size: usize, max_queue_size: usize) -> Harness {
    let descriptors: Vec<TableDescriptor> = serde_json::from_value(json!([
        {"name": "login", "columns": [{"name": "user_id"}]}
    ]))
    .expect("valid descriptors");
    let registry = Arc::new(SchemaRegistry::from_descriptors(descriptors).expect("registry"));
    let store = Arc::new(GatedStore::default());
    let config = IngestConfig {
        batch_size,
        flush_interval: Duration::from_secs(3600),
        max_queue_size,
    };
    let (service, handle) = BatchService::new(&config, registry, store.clone());
    tokio::spawn(service.run());
    Harness {
        endpoint: PushEndpoint::new(handle.clone(), MAX_REQUEST_BYTES),
        handle,
        store,
    }
}

/// Push body with one stream of login events, timestamps starting at `first`.
pub fn push_body(first: i64, count: i64) -> Value {
    let values: Vec<Value> = (first..first + count)
        .map(|ts| {
            let line = json!({"event_name": "login", "event_data": {"user_id": format!("u{ts}")}});
            json!([ts.to_string(), line.to_string()])
        })
        .collect();
    json!({"streams": [{"stream": {"app": "game"}, "values": values}]})
}

pub fn request(method: Method, path: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    let body = body.into();
    Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Full::new(body))
        .expect("valid request")
}

pub fn push(body: &Value) -> Request<Full<Bytes>> {
    request(Method::POST, "/loki/api/v1/push", body.to_string())
}

pub async fn json_body(response: Response<Full<Bytes>>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}
