// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! SQL text builders. Identifiers reaching this module were validated by the schema registry and
//! are quoted anyway.

use event_ingest::schema::Destination;
use std::fmt::Write;

/// Upper bound on bind parameters in one statement.
pub const MAX_PARAMS: usize = u16::MAX as usize;

const MAX_IDENTIFIER_LEN: usize = 63;
const INDEX_SUFFIX: &str = "_fingerprint_uidx";

pub const FALLBACK_COLUMNS: [&str; 8] = [
    "id",
    "event_name",
    "raw_content",
    "raw_labels_json",
    "timestamp_ns",
    "event_timestamp",
    "created_at",
    "fingerprint",
];

#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn fingerprint_index_name(table: &str) -> String {
    let keep = table.len().min(MAX_IDENTIFIER_LEN - INDEX_SUFFIX.len());
    format!("{}{INDEX_SUFFIX}", &table[..keep])
}

/// Partial unique index that makes the fingerprint the arbiter of duplicates.
#[must_use]
pub fn create_fingerprint_index(table: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (fingerprint) WHERE fingerprint <> ''",
        quote_ident(&fingerprint_index_name(table)),
        quote_ident(table)
    )
}

/// Statements creating a destination table, adding declared columns missing from an existing
/// one, and its fingerprint index.
#[must_use]
pub fn provision_destination(destination: &Destination) -> Vec<String> {
    let table = quote_ident(&destination.table);
    let mut create = format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id UUID PRIMARY KEY, \
         fingerprint VARCHAR(64) NOT NULL DEFAULT '', \
         created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
         event_timestamp TIMESTAMPTZ NOT NULL"
    );
    for column in &destination.columns {
        let _ = write!(
            create,
            ", {} {}",
            quote_ident(&column.column),
            column.column_type.sql_type()
        );
    }
    create.push(')');

    let mut statements = vec![create];
    statements.extend(destination.columns.iter().map(|column| {
        format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {} {}",
            quote_ident(&column.column),
            column.column_type.sql_type()
        )
    }));
    statements.push(create_fingerprint_index(&destination.table));
    if let Some(comment) = &destination.comment {
        statements.push(format!(
            "COMMENT ON TABLE {table} IS {}",
            quote_literal(comment)
        ));
    }
    statements
}

#[must_use]
pub fn provision_fallback(table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id UUID PRIMARY KEY, \
             event_name TEXT NOT NULL DEFAULT '', \
             raw_content TEXT NOT NULL, \
             raw_labels_json TEXT NOT NULL DEFAULT '{{}}', \
             timestamp_ns BIGINT NOT NULL, \
             event_timestamp TIMESTAMPTZ NOT NULL, \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
             fingerprint VARCHAR(64) NOT NULL DEFAULT '')",
            quote_ident(table)
        ),
        create_fingerprint_index(table),
    ]
}

/// Multi-row insert. `rows` holds, per row, which of `columns` carry a bind parameter; absent
/// columns take the column default.
///
/// Conflicting fingerprints are skipped, so the affected row count excludes duplicates.
#[must_use]
pub fn insert(table: &str, columns: &[&str], rows: &[Vec<bool>]) -> String {
    let mut sql = format!("INSERT INTO {} (", quote_ident(table));
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&quote_ident(column));
    }
    sql.push_str(") VALUES ");

    let mut param = 0;
    for (r, present) in rows.iter().enumerate() {
        if r > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (c, is_present) in present.iter().enumerate() {
            if c > 0 {
                sql.push_str(", ");
            }
            if *is_present {
                param += 1;
                let _ = write!(sql, "${param}");
            } else {
                sql.push_str("DEFAULT");
            }
        }
        sql.push(')');
    }
    sql.push_str(" ON CONFLICT (fingerprint) WHERE fingerprint <> '' DO NOTHING");
    sql
}

/// Rows per statement so that `columns_per_row` parameters each stay under [`MAX_PARAMS`].
#[must_use]
pub fn rows_per_statement(columns_per_row: usize) -> usize {
    (MAX_PARAMS / columns_per_row.max(1)).max(1)
}
