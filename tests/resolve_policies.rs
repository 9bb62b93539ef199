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

//! Multi-publisher resolution: two keypairs race for one name, and the
//! configured policy decides deterministically.

use std::sync::Arc;

use libreseed::core::records::index::NameIndex;
use libreseed::core::records::manifest::MinimalManifest;
use libreseed::core::security::keystore::{KeyHandle, Keystore};
use libreseed::core::types::{
    now_ms, LimitsConfig, PolicyConfig, PolicySelection, StoreConfig, TtlConfig, PROTOCOL,
};
use libreseed::dht::keys::name_index_key;
use libreseed::dht::publish::Publisher;
use libreseed::dht::resolve::{ResolveError, Resolver};
use libreseed::dht::store::RecordStore;
use libreseed::dht::substrate::MemorySubstrate;
use libreseed::monitoring::metrics::Metrics;

struct Harness {
    store: RecordStore,
    keystore: Arc<Keystore>,
    publisher: Arc<Publisher>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Arc::new(Keystore::open(dir.path().to_str().unwrap()).unwrap());
    let metrics = Arc::new(Metrics::new().unwrap());
    let store = RecordStore::new(
        Arc::new(MemorySubstrate::default()),
        StoreConfig::default(),
        TtlConfig::default(),
        LimitsConfig::default(),
        metrics,
    );
    let publisher = Arc::new(Publisher::new(
        store.clone(),
        Arc::clone(&keystore),
        LimitsConfig::default(),
    ));
    Harness { store, keystore, publisher, _dir: dir }
}

fn signed_minimal(
    keystore: &Keystore,
    handle: &KeyHandle,
    name: &str,
    version: &str,
    seed: u8,
) -> MinimalManifest {
    let mut minimal = MinimalManifest {
        protocol: PROTOCOL.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        infohash: hex::encode([seed; 32]),
        pubkey: handle.public_key().to_wire(),
        signature: format!("ed25519:{}", "00".repeat(64)),
        timestamp: now_ms(),
    };
    let sig = keystore.sign(handle, &minimal.signing_bytes().unwrap()).unwrap();
    minimal.signature = sig.to_wire();
    minimal
}

fn resolver(h: &Harness, selection: PolicySelection, trust: Vec<String>) -> Resolver {
    Resolver::new(
        h.store.clone(),
        PolicyConfig { selection, trust_list: trust, seeder_ids: Vec::new() },
    )
}

#[tokio::test]
async fn two_publishers_race_for_one_name() {
    let h = harness();
    let k1 = h.keystore.generate().unwrap();
    let k2 = h.keystore.generate().unwrap();

    let m1 = signed_minimal(&h.keystore, &k1, "pkg", "1.0.0", 1);
    h.publisher.publish_version(&k1, &m1).await.unwrap();
    let m2 = signed_minimal(&h.keystore, &k2, "pkg", "2.0.0", 2);
    h.publisher.publish_version(&k2, &m2).await.unwrap();

    // The index ends with two self-signed rows.
    let fetched = h
        .store
        .get::<NameIndex>(&name_index_key("pkg"))
        .await
        .unwrap()
        .expect("index present");
    let index = fetched.record;
    assert_eq!(index.publishers.len(), 2);
    let e1 = index.entry_for(&k1.public_key().to_wire()).expect("k1 row");
    assert_eq!(e1.latest_version, "1.0.0");
    let e2 = index.entry_for(&k2.public_key().to_wire()).expect("k2 row");
    assert_eq!(e2.latest_version, "2.0.0");
    assert!(e1.first_seen < e2.first_seen, "publish order pins firstSeen order");

    // first-seen: the earlier claimant wins.
    let r = resolver(&h, PolicySelection::FirstSeen, vec![]);
    assert_eq!(r.resolve_publisher("pkg").await.unwrap(), k1.public_key());

    // latest-version: the higher semver wins.
    let r = resolver(&h, PolicySelection::LatestVersion, vec![]);
    assert_eq!(r.resolve_publisher("pkg").await.unwrap(), k2.public_key());

    // user-trust: an explicit trust hit beats first-seen.
    let r = resolver(
        &h,
        PolicySelection::UserTrust,
        vec![k2.public_key().to_wire()],
    );
    assert_eq!(r.resolve_publisher("pkg").await.unwrap(), k2.public_key());

    // user-trust with no hits falls back to first-seen.
    let r = resolver(
        &h,
        PolicySelection::UserTrust,
        vec![format!("ed25519:{}", "aa".repeat(32))],
    );
    assert_eq!(r.resolve_publisher("pkg").await.unwrap(), k1.public_key());
}

#[tokio::test]
async fn full_resolution_returns_infohash_and_binds_publisher() {
    let h = harness();
    let k1 = h.keystore.generate().unwrap();
    let k2 = h.keystore.generate().unwrap();

    let m1 = signed_minimal(&h.keystore, &k1, "pkg", "1.0.0", 7);
    h.publisher.publish_version(&k1, &m1).await.unwrap();
    let m2 = signed_minimal(&h.keystore, &k2, "pkg", "2.0.0", 8);
    h.publisher.publish_version(&k2, &m2).await.unwrap();

    let r = resolver(&h, PolicySelection::FirstSeen, vec![]);
    let resolved = r.resolve("pkg", "1.0.0").await.unwrap();
    assert_eq!(resolved.infohash.to_hex(), m1.infohash);
    assert_eq!(resolved.pubkey, k1.public_key());
    assert!(!resolved.stale);

    // 2.0.0 exists but belongs to k2; under first-seen the name resolves to
    // k1, so the fetched manifest is a mix-and-match.
    let err = r.resolve("pkg", "2.0.0").await.unwrap_err();
    assert!(matches!(err, ResolveError::PublisherMismatch), "{err:?}");

    // Unpublished versions are an answer, not a transport failure.
    let err = r.resolve("pkg", "3.0.0").await.unwrap_err();
    assert!(matches!(err, ResolveError::NotFound), "{err:?}");

    let err = r.resolve("other", "1.0.0").await.unwrap_err();
    assert!(matches!(err, ResolveError::NotFound), "{err:?}");
}

#[tokio::test]
async fn seeder_count_follows_live_seeders() {
    let h = harness();
    let k1 = h.keystore.generate().unwrap();
    let k2 = h.keystore.generate().unwrap();

    let m1 = signed_minimal(&h.keystore, &k1, "pkg", "1.0.0", 1);
    h.publisher.publish_version(&k1, &m1).await.unwrap();
    let m2 = signed_minimal(&h.keystore, &k2, "pkg", "2.0.0", 2);
    h.publisher.publish_version(&k2, &m2).await.unwrap();

    // One live seeder serving k2's version.
    let seeder = h.keystore.generate().unwrap();
    let pk = seeder.public_key();
    let status = libreseed::core::records::announce::SeederStatus {
        protocol: PROTOCOL.to_string(),
        seeder_id: libreseed::core::records::announce::seeder_id_for(&pk),
        pubkey: pk.to_wire(),
        timestamp: now_ms(),
        seeded_packages: vec!["pkg@2.0.0".to_string()],
        uptime_seconds: 60,
        disk_usage_bytes: 1024,
        bandwidth_stats: Default::default(),
        signature: format!("ed25519:{}", "00".repeat(64)),
    };
    let seeder_id = status.seeder_id.clone();
    h.publisher.publish_seeder_status(&seeder, status).await.unwrap();

    let r = Resolver::new(
        h.store.clone(),
        PolicyConfig {
            selection: PolicySelection::SeederCount,
            trust_list: Vec::new(),
            seeder_ids: vec![seeder_id],
        },
    );
    // k2 has one live seeder, k1 has none.
    assert_eq!(r.resolve_publisher("pkg").await.unwrap(), k2.public_key());

    // With no known seeders the policy degrades to first-seen.
    let r = resolver(&h, PolicySelection::SeederCount, vec![]);
    assert_eq!(r.resolve_publisher("pkg").await.unwrap(), k1.public_key());
}

#[tokio::test]
async fn latest_version_in_index_is_monotone() {
    let h = harness();
    let k1 = h.keystore.generate().unwrap();

    let m = signed_minimal(&h.keystore, &k1, "pkg", "1.5.0", 1);
    h.publisher.publish_version(&k1, &m).await.unwrap();
    // An older version arriving later must not roll the index entry back.
    let m = signed_minimal(&h.keystore, &k1, "pkg", "1.2.0", 2);
    h.publisher.publish_version(&k1, &m).await.unwrap();

    let fetched = h
        .store
        .get::<NameIndex>(&name_index_key("pkg"))
        .await
        .unwrap()
        .expect("index present");
    let entry = fetched.record.entry_for(&k1.public_key().to_wire()).unwrap().clone();
    assert_eq!(entry.latest_version, "1.5.0");
}

#[tokio::test]
async fn retracting_the_only_version_retires_the_publisher_row() {
    let h = harness();
    let k1 = h.keystore.generate().unwrap();
    let k2 = h.keystore.generate().unwrap();

    let m1 = signed_minimal(&h.keystore, &k1, "pkg", "1.0.0", 1);
    h.publisher.publish_version(&k1, &m1).await.unwrap();
    let m2 = signed_minimal(&h.keystore, &k2, "pkg", "2.0.0", 2);
    h.publisher.publish_version(&k2, &m2).await.unwrap();

    h.publisher.retract_version(&k1, "pkg", "1.0.0").await.unwrap();

    let fetched = h
        .store
        .get::<NameIndex>(&name_index_key("pkg"))
        .await
        .unwrap()
        .expect("index still present");
    assert_eq!(fetched.record.publishers.len(), 1);
    assert_eq!(fetched.record.publishers[0].pubkey, k2.public_key().to_wire());

    // k1's announce no longer lists the package.
    use libreseed::core::records::announce::Announce;
    use libreseed::dht::keys::announce_key;
    let announce = h
        .store
        .get::<Announce>(&announce_key(&k1.public_key()))
        .await
        .unwrap()
        .expect("announce still present");
    assert!(announce.record.packages.is_empty());
}

#[tokio::test]
async fn first_seen_is_pinned_across_updates() {
    let h = harness();
    let k1 = h.keystore.generate().unwrap();

    let m = signed_minimal(&h.keystore, &k1, "pkg", "1.0.0", 1);
    h.publisher.publish_version(&k1, &m).await.unwrap();
    let fetched = h.store.get::<NameIndex>(&name_index_key("pkg")).await.unwrap().unwrap();
    let first_seen = fetched.record.publishers[0].first_seen;

    let m = signed_minimal(&h.keystore, &k1, "pkg", "2.0.0", 2);
    h.publisher.publish_version(&k1, &m).await.unwrap();
    let fetched = h.store.get::<NameIndex>(&name_index_key("pkg")).await.unwrap().unwrap();
    let entry = fetched.record.entry_for(&k1.public_key().to_wire()).unwrap().clone();
    assert_eq!(entry.first_seen, first_seen);
    assert_eq!(entry.latest_version, "2.0.0");
    assert!(entry.timestamp > first_seen);
}
