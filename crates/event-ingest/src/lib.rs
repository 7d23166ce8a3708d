// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Core of the push ingestion pipeline.
//!
//! Entries arrive through [`intake`], are fingerprinted and deduplicated per call, buffered in the
//! bounded [`queue`], and persisted by the [`batch_service`] worker: each flush routes entries to
//! their destination tables via the [`schema`] registry and hands the partitions to the
//! [`writer`], which folds uniqueness conflicts into success and redirects failed writes to the
//! fallback table.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch_service;
pub mod config;
pub mod entry;
pub mod errors;
pub mod fingerprint;
pub mod flusher;
pub mod intake;
pub mod queue;
pub mod router;
pub mod schema;
pub mod storage;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;
