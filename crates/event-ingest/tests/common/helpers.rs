// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers to build registries, push bodies and running services

use super::mocks::MockStore;
use event_ingest::batch_service::{BatchHandle, BatchService};
use event_ingest::config::IngestConfig;
use event_ingest::intake::PushStream;
use event_ingest::schema::{SchemaRegistry, TableDescriptor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Tables `a` and `b` for events of the same name. Event `c` has no table.
pub fn registry() -> Arc<SchemaRegistry> {
    let descriptors: Vec<TableDescriptor> = serde_json::from_value(json!([
        {"name": "a", "columns": [
            {"name": "player", "type": "text"},
            {"name": "score", "type": "bigint"}
        ]},
        {"name": "b", "columns": [
            {"name": "item", "type": "text"},
            {"name": "server", "label": "server"}
        ]}
    ]))
    .expect("valid descriptors");
    Arc::new(SchemaRegistry::from_descriptors(descriptors).expect("valid registry"))
}

pub fn event(event_name: &str, data: Value) -> String {
    json!({"event_name": event_name, "event_data": data}).to_string()
}

/// One stream holding `(timestamp, content)` values.
pub fn stream(labels: &[(&str, &str)], values: &[(i64, String)]) -> PushStream {
    let labels: serde_json::Map<String, Value> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    let values: Vec<Value> = values
        .iter()
        .map(|(ts, line)| json!([ts.to_string(), line]))
        .collect();
    let body = json!({"stream": labels, "values": values});
    serde_json::from_value(body).expect("valid stream")
}

pub struct Pipeline {
    pub handle: BatchHandle,
    pub store: Arc<MockStore>,
    pub task: JoinHandle<()>,
}

#[allow(dead_code)]
pub fn start(batch_size: usize, max_queue_size: usize, flush_interval: Duration) -> Pipeline {
    let store = Arc::new(MockStore::default());
    let config = IngestConfig {
        batch_size,
        flush_interval,
        max_queue_size,
    };
    let (service, handle) = BatchService::new(&config, registry(), store.clone());
    let task = tokio::spawn(service.run());
    Pipeline {
        handle,
        store,
        task,
    }
}

#[allow(dead_code)]
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
