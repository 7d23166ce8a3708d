// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Routes drained entries to destination tables or to the fallback table.

use crate::entry::PendingEntry;
use crate::errors::EnvelopeError;
use crate::schema::{ColumnMapping, ColumnType, Destination, FieldSource, SchemaRegistry};
use crate::storage::{FallbackRow, FieldValue, Row};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Decoded view of an entry's content.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_name: String,
    pub payload: Map<String, Value>,
}

impl EventEnvelope {
    /// Decodes `{"event_name": ..., "event_data": ...}`.
    ///
    /// `event_data` may be an object or a string holding a JSON object; when absent the payload
    /// is empty.
    pub fn decode(content: &str) -> Result<Self, EnvelopeError> {
        let Value::Object(mut object) = serde_json::from_str::<Value>(content)? else {
            return Err(EnvelopeError::NotAnObject);
        };
        let event_name = match object.remove("event_name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name,
            _ => return Err(EnvelopeError::MissingEventName),
        };
        let payload = match object.remove("event_data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                _ => return Err(EnvelopeError::InvalidPayload),
            },
            Some(_) => return Err(EnvelopeError::InvalidPayload),
        };
        Ok(Self {
            event_name,
            payload,
        })
    }
}

/// Projected rows for one destination, aligned index by index with the entries they came from.
#[derive(Debug, Clone)]
pub struct DestinationBatch {
    pub destination: Arc<Destination>,
    pub rows: Vec<Row>,
    pub entries: Vec<PendingEntry>,
}

/// Output of one routing pass.
#[derive(Debug, Clone)]
pub struct RoutedBatch {
    pub destinations: Vec<DestinationBatch>,
    pub fallback: Vec<FallbackRow>,
    pub created_at: DateTime<Utc>,
}

impl RoutedBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.destinations.iter().map(|b| b.rows.len()).sum::<usize>() + self.fallback.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<SchemaRegistry>,
}

impl Router {
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Partitions `entries` by destination. Nothing is discarded: entries that fail to decode or
    /// name an unknown event go to the fallback collection.
    #[must_use]
    pub fn route(&self, entries: Vec<PendingEntry>) -> RoutedBatch {
        let created_at = Utc::now();
        let mut destinations: Vec<DestinationBatch> = Vec::new();
        let mut index_by_table: HashMap<String, usize> = HashMap::new();
        let mut fallback = Vec::new();

        for entry in entries {
            let envelope = match EventEnvelope::decode(&entry.content) {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!(
                        "Entry {} routed to fallback, undecodable content: {e}",
                        entry.fingerprint
                    );
                    fallback.push(FallbackRow::from_entry(&entry, None, created_at));
                    continue;
                }
            };
            let Some(destination) = self.registry.lookup(&envelope.event_name) else {
                debug!(
                    "No table registered for event {}, routing to fallback",
                    envelope.event_name
                );
                fallback.push(FallbackRow::from_entry(
                    &entry,
                    Some(&envelope.event_name),
                    created_at,
                ));
                continue;
            };

            let row = project(destination, &envelope, &entry, created_at);
            let index = *index_by_table
                .entry(destination.table.clone())
                .or_insert_with(|| {
                    destinations.push(DestinationBatch {
                        destination: Arc::clone(destination),
                        rows: Vec::new(),
                        entries: Vec::new(),
                    });
                    destinations.len() - 1
                });
            destinations[index].rows.push(row);
            destinations[index].entries.push(entry);
        }

        RoutedBatch {
            destinations,
            fallback,
            created_at,
        }
    }
}

/// Builds the row for `destination`: declared columns only, plus the system columns.
fn project(
    destination: &Destination,
    envelope: &EventEnvelope,
    entry: &PendingEntry,
    created_at: DateTime<Utc>,
) -> Row {
    let mut row = Row::new();
    for mapping in &destination.columns {
        let raw = match &mapping.source {
            FieldSource::Payload(key) => envelope.payload.get(key).cloned(),
            FieldSource::Label(key) => entry.labels.get(key).cloned().map(Value::String),
        };
        let Some(raw) = raw else {
            continue;
        };
        row.insert(mapping.column.clone(), coerce(mapping, raw, &destination.table));
    }
    row.insert("id".to_string(), FieldValue::Uuid(Uuid::new_v4()));
    row.insert(
        "fingerprint".to_string(),
        FieldValue::Text(entry.fingerprint.to_string()),
    );
    row.insert("created_at".to_string(), FieldValue::Timestamp(created_at));
    row.insert(
        "event_timestamp".to_string(),
        FieldValue::Timestamp(entry.event_time()),
    );
    row
}

fn coerce(mapping: &ColumnMapping, raw: Value, table: &str) -> FieldValue {
    if raw.is_null() {
        return FieldValue::Null;
    }
    let coerced = match mapping.column_type {
        ColumnType::Text => Some(FieldValue::Text(match &raw {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        ColumnType::Bigint => to_int(&raw).map(FieldValue::Int),
        ColumnType::Double => to_float(&raw).map(FieldValue::Float),
        ColumnType::Boolean => to_bool(&raw).map(FieldValue::Bool),
        ColumnType::Timestamptz => to_timestamp(&raw).map(FieldValue::Timestamp),
        ColumnType::Jsonb => Some(FieldValue::Json(raw.clone())),
    };
    coerced.unwrap_or_else(|| {
        debug!(
            "Cannot store {raw} from {} as {:?} in {table}.{}, writing NULL",
            mapping.source, mapping.column_type, mapping.column
        );
        FieldValue::Null
    })
}

fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// RFC 3339 strings, or numbers taken as Unix milliseconds.
fn to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
