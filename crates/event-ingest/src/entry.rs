// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::IntakeError;
use crate::fingerprint::{fingerprint, Fingerprint, Labels};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// An accepted entry waiting in the queue for the next flush.
///
/// Entries of the same stream share their label map through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub timestamp_nanos: i64,
    pub content: String,
    pub labels: Arc<Labels>,
    pub received_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

impl PendingEntry {
    /// Builds an entry and computes its fingerprint.
    pub fn new(
        timestamp_nanos: i64,
        content: String,
        labels: Arc<Labels>,
        received_at: DateTime<Utc>,
    ) -> Result<Self, IntakeError> {
        if timestamp_nanos < 0 {
            return Err(IntakeError::NegativeTimestamp(timestamp_nanos));
        }
        let fingerprint = fingerprint(timestamp_nanos, &content, &labels);
        Ok(Self {
            timestamp_nanos,
            content,
            labels,
            received_at,
            fingerprint,
        })
    }

    /// Parses a Loki-style nanosecond timestamp string.
    pub fn parse_timestamp(raw: &str) -> Result<i64, IntakeError> {
        let nanos = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| IntakeError::Timestamp(raw.to_string()))?;
        if nanos < 0 {
            return Err(IntakeError::NegativeTimestamp(nanos));
        }
        Ok(nanos)
    }

    /// Event time derived from the nanosecond timestamp.
    #[must_use]
    pub fn event_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp_nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_time_keeps_nanoseconds() {
        let entry = PendingEntry::new(
            1_700_000_000_123_456_789,
            "{}".to_string(),
            Arc::new(Labels::new()),
            Utc::now(),
        )
        .unwrap();
        let event_time = entry.event_time();
        assert_eq!(event_time.timestamp(), 1_700_000_000);
        assert_eq!(event_time.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            PendingEntry::parse_timestamp("1700000000000000000"),
            Ok(1_700_000_000_000_000_000)
        );
        assert_eq!(PendingEntry::parse_timestamp(" 15 "), Ok(15));
        assert_eq!(
            PendingEntry::parse_timestamp("17e9"),
            Err(IntakeError::Timestamp("17e9".to_string()))
        );
        assert_eq!(
            PendingEntry::parse_timestamp("-1"),
            Err(IntakeError::NegativeTimestamp(-1))
        );
        assert!(PendingEntry::parse_timestamp("99999999999999999999").is_err());
    }

    #[test]
    fn test_fingerprint_matches_free_function() {
        let labels: Labels = [("job".to_string(), "api".to_string())].into();
        let entry =
            PendingEntry::new(7, "line".to_string(), Arc::new(labels.clone()), Utc::now()).unwrap();
        assert_eq!(entry.fingerprint, fingerprint(7, "line", &labels));
    }
}
