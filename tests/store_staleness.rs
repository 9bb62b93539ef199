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

//! Store behavior under stale records, divergent replicas, and forgeries.

use std::sync::Arc;

use libreseed::core::codec::wire_bytes;
use libreseed::core::records::index::{NameIndex, PublisherEntry};
use libreseed::core::records::manifest::MinimalManifest;
use libreseed::core::security::keystore::{KeyHandle, Keystore};
use libreseed::core::types::{now_ms, LimitsConfig, StoreConfig, TtlConfig, PROTOCOL};
use libreseed::dht::keys::{manifest_key, name_index_key};
use libreseed::dht::store::RecordStore;
use libreseed::dht::substrate::MemorySubstrate;
use libreseed::monitoring::metrics::Metrics;

fn store_over(substrate: Arc<MemorySubstrate>) -> RecordStore {
    RecordStore::new(
        substrate,
        StoreConfig::default(),
        TtlConfig::default(),
        LimitsConfig::default(),
        Arc::new(Metrics::new().unwrap()),
    )
}

fn signed_minimal_at(
    keystore: &Keystore,
    handle: &KeyHandle,
    timestamp: u64,
) -> MinimalManifest {
    let mut minimal = MinimalManifest {
        protocol: PROTOCOL.to_string(),
        name: "pkg".to_string(),
        version: "1.0.0".to_string(),
        infohash: hex::encode([9u8; 32]),
        pubkey: handle.public_key().to_wire(),
        signature: format!("ed25519:{}", "00".repeat(64)),
        timestamp,
    };
    let sig = keystore.sign(handle, &minimal.signing_bytes().unwrap()).unwrap();
    minimal.signature = sig.to_wire();
    minimal
}

#[tokio::test]
async fn stale_manifest_is_returned_marked_stale() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();

    let substrate = Arc::new(MemorySubstrate::default());
    let store = store_over(Arc::clone(&substrate));

    // 25 hours old against a 24 hour TTL.
    let old_ts = now_ms() - 25 * 60 * 60 * 1000;
    let minimal = signed_minimal_at(&keystore, &handle, old_ts);
    let key = manifest_key("pkg", "1.0.0");
    store.put(&key, &minimal).await.unwrap();

    let fetched = store.get::<MinimalManifest>(&key).await.unwrap().expect("present");
    assert!(fetched.stale, "25h old record must be marked stale");
    // Infohashes are content-addressed; the record is still usable.
    assert_eq!(fetched.record.infohash, minimal.infohash);
}

#[tokio::test]
async fn newest_verified_timestamp_wins_across_replicas() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();

    let substrate = Arc::new(MemorySubstrate::default());
    let store = store_over(Arc::clone(&substrate));

    let now = now_ms();
    let older = signed_minimal_at(&keystore, &handle, now - 1000);
    let newer = signed_minimal_at(&keystore, &handle, now);

    let key = manifest_key("pkg", "1.0.0");
    store.put(&key, &older).await.unwrap();
    // One replica lags behind with the old value; another got the new one.
    substrate.set_replica_value(1, key, wire_bytes(&newer).unwrap());

    let fetched = store.get::<MinimalManifest>(&key).await.unwrap().expect("present");
    assert_eq!(fetched.timestamp, newer.timestamp);
    assert_eq!(fetched.record.signature, newer.signature);
}

#[tokio::test]
async fn unverifiable_records_are_absent() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();

    let substrate = Arc::new(MemorySubstrate::default());
    let store = store_over(Arc::clone(&substrate));

    let mut forged = signed_minimal_at(&keystore, &handle, now_ms());
    forged.infohash = hex::encode([1u8; 32]); // bytes changed after signing
    let key = manifest_key("pkg", "1.0.0");
    for replica in 0..3 {
        substrate.set_replica_value(replica, key, wire_bytes(&forged).unwrap());
    }

    let fetched = store.get::<MinimalManifest>(&key).await.unwrap();
    assert!(fetched.is_none(), "forged record must read as absent");
}

#[tokio::test]
async fn forged_verified_mix_falls_back_to_the_verified_value() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();

    let substrate = Arc::new(MemorySubstrate::default());
    let store = store_over(Arc::clone(&substrate));

    let now = now_ms();
    let genuine = signed_minimal_at(&keystore, &handle, now - 5000);
    let mut forged = signed_minimal_at(&keystore, &handle, now);
    forged.infohash = hex::encode([1u8; 32]);

    let key = manifest_key("pkg", "1.0.0");
    store.put(&key, &genuine).await.unwrap();
    substrate.set_replica_value(2, key, wire_bytes(&forged).unwrap());

    let fetched = store.get::<MinimalManifest>(&key).await.unwrap().expect("present");
    // The forged record is newer but unverifiable; the older genuine one wins.
    assert_eq!(fetched.timestamp, genuine.timestamp);
}

#[tokio::test]
async fn name_index_drops_rows_that_fail_their_own_signature() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let genuine_key = keystore.generate().unwrap();

    let substrate = Arc::new(MemorySubstrate::default());
    let store = store_over(Arc::clone(&substrate));

    let now = now_ms();
    let mut genuine = PublisherEntry {
        pubkey: genuine_key.public_key().to_wire(),
        latest_version: "1.0.0".to_string(),
        first_seen: now,
        timestamp: now,
        signature: format!("ed25519:{}", "00".repeat(64)),
    };
    let sig = keystore
        .sign(&genuine_key, &genuine.signing_bytes("pkg").unwrap())
        .unwrap();
    genuine.signature = sig.to_wire();

    // A row claiming another pubkey, signed by nobody.
    let forged = PublisherEntry {
        pubkey: format!("ed25519:{}", "aa".repeat(32)),
        latest_version: "9.9.9".to_string(),
        first_seen: 1,
        timestamp: now,
        signature: format!("ed25519:{}", "bb".repeat(64)),
    };

    let index = NameIndex {
        protocol: PROTOCOL.to_string(),
        index_version: 1,
        name: "pkg".to_string(),
        publishers: vec![forged, genuine.clone()],
        timestamp: now,
    };
    let key = name_index_key("pkg");
    for replica in 0..3 {
        substrate.set_replica_value(replica, key, wire_bytes(&index).unwrap());
    }

    let fetched = store.get::<NameIndex>(&key).await.unwrap().expect("present");
    assert_eq!(fetched.record.publishers.len(), 1);
    assert_eq!(fetched.record.publishers[0].pubkey, genuine.pubkey);
}
