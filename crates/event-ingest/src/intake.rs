// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push-call intake: turns deserialized streams into pending entries.
//!
//! Deduplication here is scoped to a single call. Repeats split across calls are left to the
//! storage uniqueness constraint.

use crate::entry::PendingEntry;
use crate::errors::IntakeError;
use crate::fingerprint::{Fingerprint, Labels};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Body of a push request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub streams: Vec<PushStream>,
}

/// One labeled stream of `[timestamp, line, ...]` values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushStream {
    #[serde(default, rename = "stream")]
    pub labels: Labels,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

/// Counters describing what one push call produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeSummary {
    pub streams: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

/// Converts the streams of one push call into deduplicated pending entries.
pub fn collect_entries(streams: Vec<PushStream>) -> (Vec<PendingEntry>, IntakeSummary) {
    let received_at = Utc::now();
    let mut seen: HashSet<Fingerprint> = HashSet::new();
    let mut entries = Vec::new();
    let mut summary = IntakeSummary {
        streams: streams.len(),
        ..IntakeSummary::default()
    };

    for stream in streams {
        if stream.values.is_empty() {
            continue;
        }
        let labels = Arc::new(stream.labels);
        for value in stream.values {
            let entry = match parse_value(value).and_then(|(ts, line)| {
                PendingEntry::new(ts, line, Arc::clone(&labels), received_at)
            }) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping malformed entry: {e}");
                    summary.malformed += 1;
                    continue;
                }
            };

            if !seen.insert(entry.fingerprint.clone()) {
                debug!("Duplicate entry within push call, fingerprint {}", entry.fingerprint);
                summary.duplicates += 1;
                continue;
            }
            entries.push(entry);
        }
    }

    summary.accepted = entries.len();
    (entries, summary)
}

fn parse_value(value: Vec<Value>) -> Result<(i64, String), IntakeError> {
    if value.len() < 2 {
        return Err(IntakeError::Shape(value.len()));
    }
    let mut parts = value.into_iter();
    let timestamp = match parts.next() {
        Some(Value::String(raw)) => PendingEntry::parse_timestamp(&raw)?,
        _ => return Err(IntakeError::TimestampType),
    };
    match parts.next() {
        Some(Value::String(line)) => Ok((timestamp, line)),
        _ => Err(IntakeError::LineType),
    }
}
