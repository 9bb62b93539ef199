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

//! The DHT substrate seam.
//!
//! The core does not mandate a DHT implementation; everything network-shaped
//! goes through [`DhtSubstrate`]. The substrate stores mutable byte strings
//! up to 8 KiB under 32-byte keys, best-effort. A `get` models one replica
//! query and may surface several divergent candidate values; conflict
//! resolution lives in the store, not here.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::dht::keys::DhtKey;

/// Substrate failures. All of these are transient from the caller's view.
#[derive(Debug, Error)]
pub enum SubstrateError {
    /// No replica could be reached.
    #[error("substrate unreachable")]
    Unreachable,
    /// Local backing storage failed.
    #[error("substrate io")]
    Io,
}

/// Best-effort mutable key/value store over the DHT.
#[async_trait]
pub trait DhtSubstrate: Send + Sync {
    /// Query replicas for a key. Divergent replicas may yield several
    /// candidate values; an empty vec means the key is absent.
    async fn get(&self, key: &DhtKey) -> Result<Vec<Vec<u8>>, SubstrateError>;

    /// Store a value. `Ok` means at least one replica acknowledged.
    async fn put(&self, key: &DhtKey, value: &[u8]) -> Result<(), SubstrateError>;
}

/// In-memory substrate simulating N replicas. Test double.
pub struct MemorySubstrate {
    replicas: Vec<Mutex<HashMap<DhtKey, Vec<u8>>>>,
}

impl MemorySubstrate {
    /// Create a substrate with `replicas` independent replica maps.
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: (0..replicas.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Overwrite one replica's value directly, bypassing `put`.
    ///
    /// Lets tests build divergent replica states and unverifiable records.
    pub fn set_replica_value(&self, replica: usize, key: DhtKey, value: Vec<u8>) {
        if let Some(map) = self.replicas.get(replica) {
            if let Ok(mut guard) = map.lock() {
                guard.insert(key, value);
            }
        }
    }
}

impl Default for MemorySubstrate {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl DhtSubstrate for MemorySubstrate {
    async fn get(&self, key: &DhtKey) -> Result<Vec<Vec<u8>>, SubstrateError> {
        let mut out: Vec<Vec<u8>> = Vec::new();
        for replica in &self.replicas {
            let guard = replica.lock().map_err(|_| SubstrateError::Io)?;
            if let Some(v) = guard.get(key) {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
        }
        Ok(out)
    }

    async fn put(&self, key: &DhtKey, value: &[u8]) -> Result<(), SubstrateError> {
        for replica in &self.replicas {
            let mut guard = replica.lock().map_err(|_| SubstrateError::Io)?;
            guard.insert(*key, value.to_vec());
        }
        Ok(())
    }
}

/// Persistent local replica cache backed by sled.
///
/// Stands in for a remote substrate on single-node deployments and keeps
/// records warm across restarts.
pub struct SledSubstrate {
    db: sled::Db,
}

impl SledSubstrate {
    /// Open (or create) the cache at `path`.
    pub fn open(path: &str) -> Result<Self, SubstrateError> {
        let db = sled::open(path).map_err(|_| SubstrateError::Io)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl DhtSubstrate for SledSubstrate {
    async fn get(&self, key: &DhtKey) -> Result<Vec<Vec<u8>>, SubstrateError> {
        let v = self.db.get(key.as_bytes()).map_err(|_| SubstrateError::Io)?;
        Ok(v.map(|iv| vec![iv.to_vec()]).unwrap_or_default())
    }

    async fn put(&self, key: &DhtKey, value: &[u8]) -> Result<(), SubstrateError> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|_| SubstrateError::Io)?;
        self.db.flush_async().await.map_err(|_| SubstrateError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::keys::manifest_key;

    #[tokio::test]
    async fn memory_substrate_surfaces_divergent_values() {
        let sub = MemorySubstrate::new(3);
        let key = manifest_key("pkg", "1.0.0");
        sub.put(&key, b"agreed").await.unwrap();
        sub.set_replica_value(2, key, b"divergent".to_vec());

        let mut got = sub.get(&key).await.unwrap();
        got.sort();
        assert_eq!(got, vec![b"agreed".to_vec(), b"divergent".to_vec()]);
    }
}
