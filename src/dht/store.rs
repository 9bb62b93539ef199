// Copyright (c) 2026 LibreSeed
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Verified record store over the DHT substrate.
//!
//! `get` verifies signatures on read; a record that fails verification is
//! indistinguishable from an absent one. Divergent replica values are
//! resolved toward the newest verified timestamp, ties broken by
//! lexicographic comparison of canonical bytes. Records older than their TTL
//! are returned marked stale; the caller decides whether to use them.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::codec::{decode_limited, wire_bytes, CodecError};
use crate::core::records::announce::{Announce, SeederStatus};
use crate::core::records::index::NameIndex;
use crate::core::records::manifest::MinimalManifest;
use crate::core::records::RecordError;
use crate::core::types::{now_ms, LimitsConfig, StoreConfig, TtlConfig};
use crate::dht::keys::DhtKey;
use crate::dht::substrate::DhtSubstrate;
use crate::monitoring::metrics::Metrics;

use serde::{de::DeserializeOwned, Serialize};

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Every replica query failed or timed out. Transient.
    #[error("fetch failed")]
    FetchFailed,
    /// No replica acknowledged the write in time. Transient.
    #[error("put failed")]
    PutFailed,
    /// Serialized record exceeds the substrate's size contract.
    #[error("record too large")]
    TooLarge,
    /// Canonical codec failure.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}

/// Record families the store knows TTLs for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    /// MinimalManifest.
    Manifest,
    /// NameIndex.
    NameIndex,
    /// Announce.
    Announce,
    /// SeederStatus.
    SeederStatus,
}

impl RecordKind {
    fn ttl_ms(&self, ttl: &TtlConfig) -> u64 {
        match self {
            RecordKind::Manifest => ttl.manifest_ms,
            RecordKind::NameIndex => ttl.name_index_ms,
            RecordKind::Announce => ttl.announce_ms,
            RecordKind::SeederStatus => ttl.seeder_status_ms,
        }
    }
}

/// A record type storable in the DHT.
pub trait DhtRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// TTL family.
    const KIND: RecordKind;

    /// Record timestamp in milliseconds.
    fn timestamp(&self) -> u64;

    /// Full on-read verification: structure, semantics, signatures.
    ///
    /// May narrow the record (a NameIndex drops rows that fail their own
    /// signature). An error means the whole record is treated as absent.
    fn verify_on_read(&mut self) -> Result<(), RecordError>;
}

impl DhtRecord for MinimalManifest {
    const KIND: RecordKind = RecordKind::Manifest;

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn verify_on_read(&mut self) -> Result<(), RecordError> {
        self.validate()?;
        self.verify()
    }
}

impl DhtRecord for NameIndex {
    const KIND: RecordKind = RecordKind::NameIndex;

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn verify_on_read(&mut self) -> Result<(), RecordError> {
        self.validate()?;
        // The index author is untrusted; keep only self-verifying rows.
        self.retain_verified();
        if self.publishers.is_empty() {
            return Err(RecordError::EmptyPublishers);
        }
        Ok(())
    }
}

impl DhtRecord for Announce {
    const KIND: RecordKind = RecordKind::Announce;

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn verify_on_read(&mut self) -> Result<(), RecordError> {
        self.validate()?;
        self.verify()
    }
}

impl DhtRecord for SeederStatus {
    const KIND: RecordKind = RecordKind::SeederStatus;

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn verify_on_read(&mut self) -> Result<(), RecordError> {
        self.validate()?;
        self.verify()
    }
}

/// A verified record plus its freshness.
#[derive(Clone, Debug)]
pub struct Fetched<R> {
    /// The verified record.
    pub record: R,
    /// True when the record's timestamp is older than its TTL.
    pub stale: bool,
    /// The record's own timestamp.
    pub timestamp: u64,
}

/// Verified store over a [`DhtSubstrate`].
#[derive(Clone)]
pub struct RecordStore {
    substrate: Arc<dyn DhtSubstrate>,
    cfg: StoreConfig,
    ttl: TtlConfig,
    limits: LimitsConfig,
    metrics: Arc<Metrics>,
}

impl RecordStore {
    /// Build a store over `substrate`.
    pub fn new(
        substrate: Arc<dyn DhtSubstrate>,
        cfg: StoreConfig,
        ttl: TtlConfig,
        limits: LimitsConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { substrate, cfg, ttl, limits, metrics }
    }

    /// Fetch and verify a record.
    ///
    /// Runs up to `replica_queries` parallel queries; the first that yields a
    /// verified record wins and the rest are abandoned. `Ok(None)` means at
    /// least one replica answered and no verified record exists;
    /// `Err(FetchFailed)` means every query failed or timed out.
    pub async fn get<R: DhtRecord>(&self, key: &DhtKey) -> Result<Option<Fetched<R>>, StoreError> {
        self.metrics.dht_get_total.inc();

        let attempts = self.cfg.replica_queries.max(1);
        let timeout = Duration::from_millis(self.cfg.get_timeout_ms);
        let mut queries = FuturesUnordered::new();
        for _ in 0..attempts {
            let substrate = Arc::clone(&self.substrate);
            let key = *key;
            queries.push(async move {
                tokio::time::timeout(timeout, async move { substrate.get(&key).await }).await
            });
        }

        let mut any_answered = false;
        while let Some(outcome) = queries.next().await {
            if let Ok(Ok(candidates)) = outcome {
                any_answered = true;
                if let Some(found) = self.select_best::<R>(candidates) {
                    self.metrics.dht_get_verified_total.inc();
                    return Ok(Some(found));
                }
            }
        }

        if any_answered {
            Ok(None)
        } else {
            self.metrics.dht_get_failed_total.inc();
            Err(StoreError::FetchFailed)
        }
    }

    /// Store a record, canonical wire form, size-capped.
    pub async fn put<R: DhtRecord>(&self, key: &DhtKey, record: &R) -> Result<(), StoreError> {
        let bytes = wire_bytes(record)?;
        if bytes.len() > self.limits.record_max_bytes {
            return Err(StoreError::TooLarge);
        }

        self.metrics.dht_put_total.inc();
        let timeout = Duration::from_millis(self.cfg.put_timeout_ms);
        match tokio::time::timeout(timeout, self.substrate.put(key, &bytes)).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                self.metrics.dht_put_failed_total.inc();
                Err(StoreError::PutFailed)
            }
        }
    }

    /// Pick the best verified record among divergent replica candidates.
    fn select_best<R: DhtRecord>(&self, candidates: Vec<Vec<u8>>) -> Option<Fetched<R>> {
        let mut best: Option<(u64, Vec<u8>, R)> = None;
        for raw in candidates {
            let Ok(mut record) = decode_limited::<R>(&raw, self.limits.record_max_bytes) else {
                continue;
            };
            if record.verify_on_read().is_err() {
                continue;
            }
            let ts = record.timestamp();
            let Ok(canonical) = wire_bytes(&record) else { continue };
            let better = match &best {
                None => true,
                Some((best_ts, best_canonical, _)) => {
                    ts > *best_ts || (ts == *best_ts && canonical > *best_canonical)
                }
            };
            if better {
                best = Some((ts, canonical, record));
            }
        }

        best.map(|(ts, _, record)| {
            let ttl = R::KIND.ttl_ms(&self.ttl);
            let stale = now_ms().saturating_sub(ts) > ttl;
            Fetched { record, stale, timestamp: ts }
        })
    }
}
