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
#![deny(missing_docs)]

//! Republish scheduler: keeps DHT TTLs alive.
//!
//! Two loops. The manifest loop refreshes MinimalManifests, NameIndex
//! entries, and Announces at a steady rate; the seeder loop publishes
//! SeederStatus snapshots more often. Both are opportunistic: a failed cycle
//! is logged and retried with exponential backoff capped by config, and
//! never takes the daemon down. Cancellation stops both loops cleanly.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::security::keystore::{KeyHandle, Keystore};
use crate::core::types::{PubKey, RepublishConfig};
use crate::dht::publish::Publisher;
use crate::monitoring::metrics::Metrics;
use crate::seeder::registry::SeederRegistry;

const BACKOFF_BASE_MS: u64 = 1_000;

/// Handle to the running scheduler.
pub struct RepublishHandle {
    refresh_tx: mpsc::Sender<()>,
    manifest_task: JoinHandle<()>,
    seeder_task: JoinHandle<()>,
}

impl RepublishHandle {
    /// Request an immediate manifest-class refresh cycle (e.g. after a
    /// stale local record was observed on read).
    pub fn trigger_refresh(&self) {
        let _ = self.refresh_tx.try_send(());
    }

    /// Wait for both loops to stop. Call after cancelling.
    pub async fn join(self) {
        let _ = self.manifest_task.await;
        let _ = self.seeder_task.await;
    }
}

/// Spawn the scheduler.
///
/// `seeder_identity` is the keypair that signs SeederStatus snapshots; with
/// `None` the status loop is disabled.
pub fn spawn_republisher(
    publisher: Arc<Publisher>,
    registry: Arc<SeederRegistry>,
    keystore: Arc<Keystore>,
    seeder_identity: Option<KeyHandle>,
    cfg: RepublishConfig,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> RepublishHandle {
    let (refresh_tx, mut refresh_rx) = mpsc::channel::<()>(8);

    let manifest_task = {
        let publisher = Arc::clone(&publisher);
        let registry = Arc::clone(&registry);
        let keystore = Arc::clone(&keystore);
        let metrics = Arc::clone(&metrics);
        let cancel = cancel.clone();
        let interval = Duration::from_millis(cfg.manifest_interval_ms.max(1));
        let cap = Duration::from_millis(cfg.backoff_cap_ms.max(BACKOFF_BASE_MS));

        tokio::spawn(async move {
            let mut delay = interval;
            let mut backoff = Duration::from_millis(BACKOFF_BASE_MS);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                    Some(()) = refresh_rx.recv() => {
                        debug!("immediate refresh requested");
                    }
                }

                if manifest_cycle(&publisher, &registry, &keystore, &metrics).await {
                    backoff = Duration::from_millis(BACKOFF_BASE_MS);
                    delay = interval;
                } else {
                    delay = backoff;
                    backoff = (backoff * 2).min(cap);
                    warn!(retry_in = ?delay, "republish cycle had failures; backing off");
                }
            }
            debug!("manifest republish loop stopped");
        })
    };

    let seeder_task = {
        let cancel = cancel.clone();
        let interval = Duration::from_millis(cfg.seeder_interval_ms.max(1));
        let cap = Duration::from_millis(cfg.backoff_cap_ms.max(BACKOFF_BASE_MS));

        tokio::spawn(async move {
            let Some(handle) = seeder_identity else {
                debug!("no seeder identity; status loop disabled");
                return;
            };
            let mut delay = interval;
            let mut backoff = Duration::from_millis(BACKOFF_BASE_MS);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                let status = registry.seeder_status(&handle).await;
                match publisher.publish_seeder_status(&handle, status).await {
                    Ok(()) => {
                        metrics.republish_total.inc();
                        backoff = Duration::from_millis(BACKOFF_BASE_MS);
                        delay = interval;
                    }
                    Err(e) => {
                        metrics.republish_failed_total.inc();
                        delay = backoff;
                        backoff = (backoff * 2).min(cap);
                        warn!(err = %e, retry_in = ?delay, "seeder status publish failed");
                    }
                }
            }
            debug!("seeder status loop stopped");
        })
    };

    RepublishHandle { refresh_tx, manifest_task, seeder_task }
}

/// One manifest-class cycle. Returns true when every item succeeded.
async fn manifest_cycle(
    publisher: &Publisher,
    registry: &SeederRegistry,
    keystore: &Keystore,
    metrics: &Metrics,
) -> bool {
    let packages = registry.list().await;
    let mut all_ok = true;
    let mut owned_names: BTreeSet<(PubKey, String)> = BTreeSet::new();
    let mut owned_keys: BTreeSet<PubKey> = BTreeSet::new();

    for pkg in &packages {
        let Ok(pk) = PubKey::from_wire(&pkg.pubkey) else {
            continue;
        };
        match keystore.handle(&pk) {
            Some(handle) => {
                match publisher.republish_manifest(&handle, &pkg.minimal).await {
                    Ok(refreshed) => {
                        metrics.republish_total.inc();
                        if let Err(e) =
                            registry.store_refreshed_minimal(&pkg.infohash, refreshed).await
                        {
                            warn!(err = %e, infohash = %pkg.infohash, "persisting refreshed record failed");
                        }
                    }
                    Err(e) => {
                        metrics.republish_failed_total.inc();
                        all_ok = false;
                        warn!(err = %e, infohash = %pkg.infohash, "manifest republish failed");
                    }
                }
                owned_names.insert((pk, pkg.name.clone()));
                owned_keys.insert(pk);
            }
            None => match publisher.republish_foreign_manifest(&pkg.minimal).await {
                Ok(()) => metrics.republish_total.inc(),
                Err(e) => {
                    metrics.republish_failed_total.inc();
                    all_ok = false;
                    warn!(err = %e, infohash = %pkg.infohash, "foreign manifest re-put failed");
                }
            },
        }
    }

    for (pk, name) in &owned_names {
        let Some(handle) = keystore.handle(pk) else { continue };
        if let Err(e) = publisher.refresh_name_index(&handle, name).await {
            metrics.republish_failed_total.inc();
            all_ok = false;
            warn!(err = %e, name = %name, "name index refresh failed");
        } else {
            metrics.republish_total.inc();
        }
    }

    for pk in &owned_keys {
        let Some(handle) = keystore.handle(pk) else { continue };
        if let Err(e) = publisher.refresh_announce(&handle).await {
            metrics.republish_failed_total.inc();
            all_ok = false;
            warn!(err = %e, pubkey = %pk, "announce refresh failed");
        } else {
            metrics.republish_total.inc();
        }
    }

    all_ok
}
