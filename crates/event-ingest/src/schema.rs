// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination registry built from table descriptors.
//!
//! Every `*.json` file in the descriptor directory declares one table:
//!
//! ```json
//! {
//!   "name": "client_login",
//!   "event_name": "login",
//!   "columns": [
//!     { "name": "user_id", "type": "text" },
//!     { "name": "level", "type": "bigint" },
//!     { "name": "server", "type": "text", "label": "server_id" },
//!     { "name": "login_at", "type": "timestamptz", "field": "time" }
//!   ]
//! }
//! ```
//!
//! `event_name` defaults to the table name. A column reads the payload key of the same name
//! unless it names another `field`, or a stream `label` instead. The registry is built once and
//! shared read-only.

use crate::errors::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Columns every destination table carries besides its declared ones.
pub const SYSTEM_COLUMNS: [&str; 4] = ["id", "fingerprint", "created_at", "event_timestamp"];

const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Bigint,
    Double,
    Boolean,
    Timestamptz,
    Jsonb,
}

impl ColumnType {
    #[must_use]
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamptz => "TIMESTAMPTZ",
            ColumnType::Jsonb => "JSONB",
        }
    }
}

/// Where a column takes its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Payload(String),
    Label(String),
}

impl fmt::Display for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSource::Payload(key) => write!(f, "payload.{key}"),
            FieldSource::Label(key) => write!(f, "label.{key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub column: String,
    pub column_type: ColumnType,
    pub source: FieldSource,
}

/// A validated destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub table: String,
    pub event_name: String,
    pub comment: Option<String>,
    pub columns: Vec<ColumnMapping>,
}

impl TryFrom<TableDescriptor> for Destination {
    type Error = SchemaError;

    fn try_from(descriptor: TableDescriptor) -> Result<Self, Self::Error> {
        let table = validate_identifier(&descriptor.name)?;
        if descriptor.columns.is_empty() {
            return Err(SchemaError::NoColumns { table });
        }

        let mut seen = HashSet::with_capacity(descriptor.columns.len());
        let mut columns = Vec::with_capacity(descriptor.columns.len());
        for column in descriptor.columns {
            let name = validate_identifier(&column.name)?;
            if SYSTEM_COLUMNS.contains(&name.as_str()) {
                return Err(SchemaError::ReservedColumn {
                    table,
                    column: name,
                });
            }
            if !seen.insert(name.clone()) {
                return Err(SchemaError::DuplicateColumn {
                    table,
                    column: name,
                });
            }
            let source = match (column.label, column.field) {
                (Some(label), _) => FieldSource::Label(label),
                (None, Some(field)) => FieldSource::Payload(field),
                (None, None) => FieldSource::Payload(name.clone()),
            };
            columns.push(ColumnMapping {
                column: name,
                column_type: column.column_type,
                source,
            });
        }

        let event_name = descriptor
            .event_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| table.clone());

        Ok(Destination {
            table,
            event_name,
            comment: descriptor.comment,
            columns,
        })
    }
}

/// Checks a table or column name against `[a-z_][a-z0-9_]*`, at most 63 bytes.
///
/// Identifiers end up quoted in generated SQL, so anything outside this set is refused.
pub fn validate_identifier(raw: &str) -> Result<String, SchemaError> {
    let mut chars = raw.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_first || !valid_rest || raw.len() > MAX_IDENTIFIER_LEN {
        return Err(SchemaError::InvalidIdentifier(raw.to_string()));
    }
    Ok(raw.to_string())
}

/// Read-only map from event name to destination.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    destinations: HashMap<String, Arc<Destination>>,
}

impl SchemaRegistry {
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = TableDescriptor>,
    ) -> Result<Self, SchemaError> {
        let mut registry = Self::default();
        for descriptor in descriptors {
            registry.insert(Destination::try_from(descriptor)?)?;
        }
        Ok(registry)
    }

    /// Loads every `*.json` descriptor in `dir`.
    ///
    /// Files that fail to parse or validate are skipped with a warning. A directory that yields no
    /// destination at all is an error, as is two tables claiming the same event.
    pub fn load_dir(dir: &Path) -> Result<Self, SchemaError> {
        let io_error = |source: std::io::Error| SchemaError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for dir_entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = dir_entry.map_err(io_error)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut registry = Self::default();
        for path in paths {
            let descriptor = match std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<TableDescriptor>(&bytes).map_err(|e| e.to_string())
                }) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!("Skipping table descriptor {}: {e}", path.display());
                    continue;
                }
            };
            let destination = match Destination::try_from(descriptor) {
                Ok(destination) => destination,
                Err(e) => {
                    warn!("Skipping table descriptor {}: {e}", path.display());
                    continue;
                }
            };
            debug!(
                "Loaded table {} for event {} from {}",
                destination.table,
                destination.event_name,
                path.display()
            );
            registry.insert(destination)?;
        }

        if registry.is_empty() {
            return Err(SchemaError::Empty(dir.to_path_buf()));
        }
        info!(
            "Loaded {} table descriptor(s) from {}",
            registry.len(),
            dir.display()
        );
        Ok(registry)
    }

    fn insert(&mut self, destination: Destination) -> Result<(), SchemaError> {
        if self.destinations.contains_key(&destination.event_name) {
            return Err(SchemaError::DuplicateEvent(destination.event_name));
        }
        if self.contains_table(&destination.table) {
            return Err(SchemaError::DuplicateTable(destination.table));
        }
        self.destinations
            .insert(destination.event_name.clone(), Arc::new(destination));
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, event_name: &str) -> Option<&Arc<Destination>> {
        self.destinations.get(event_name)
    }

    #[must_use]
    pub fn contains_table(&self, table: &str) -> bool {
        self.destinations.values().any(|d| d.table == table)
    }

    /// Destinations sorted by table name.
    #[must_use]
    pub fn destinations(&self) -> Vec<Arc<Destination>> {
        let mut destinations: Vec<_> = self.destinations.values().cloned().collect();
        destinations.sort_by(|a, b| a.table.cmp(&b.table));
        destinations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}
