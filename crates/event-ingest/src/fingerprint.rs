// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Content fingerprints used for deduplication.
//!
//! A fingerprint is the lowercase hex SHA-256 of
//! `"{timestamp_nanos}|{content}|{k1}={v1},{k2}={v2},..."` with label pairs sorted by key, so the
//! iteration order of the label map never changes the result. The same string is stored in the
//! `fingerprint` column of every destination table, where a unique index makes it the final
//! arbiter of duplicates.

use derive_more::{Display, Into};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Label set attached to a pushed stream.
pub type Labels = HashMap<String, String>;

/// Hex-encoded SHA-256 fingerprint of an entry.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Into, Serialize, Deserialize,
)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes the fingerprint of `(timestamp_nanos, content, labels)`.
#[must_use]
pub fn fingerprint(timestamp_nanos: i64, content: &str, labels: &Labels) -> Fingerprint {
    let mut sorted: Vec<(&String, &String)> = labels.iter().collect();
    sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    hasher.update(timestamp_nanos.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(content.as_bytes());
    hasher.update(b"|");
    for (i, (key, value)) in sorted.into_iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    Fingerprint(hex::encode(hasher.finalize()))
}
