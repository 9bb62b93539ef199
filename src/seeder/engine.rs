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

//! Seam to the BitTorrent transfer engine.
//!
//! The piece-exchange engine is an external collaborator; the registry only
//! hands it validated tarballs and reads its transfer rates back.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::core::records::announce::BandwidthStats;
use crate::core::types::InfoHash;

/// Engine failures. Local to this node; seeding of already-accepted
/// packages continues.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected or could not open the tarball.
    #[error("engine add failed")]
    AddFailed,
    /// The engine could not drop the torrent.
    #[error("engine remove failed")]
    RemoveFailed,
}

/// Transfer engine interface.
#[async_trait]
pub trait SeedingEngine: Send + Sync {
    /// Start seeding a validated tarball under its infohash.
    async fn add_torrent(&self, infohash: &InfoHash, tarball: &Path) -> Result<(), EngineError>;

    /// Stop seeding an infohash.
    async fn remove_torrent(&self, infohash: &InfoHash) -> Result<(), EngineError>;

    /// Current transfer rates.
    async fn bandwidth(&self) -> BandwidthStats;
}

/// Engine that seeds nothing. Tests and resolver-only deployments.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEngine;

#[async_trait]
impl SeedingEngine for NoopEngine {
    async fn add_torrent(&self, _infohash: &InfoHash, _tarball: &Path) -> Result<(), EngineError> {
        Ok(())
    }

    async fn remove_torrent(&self, _infohash: &InfoHash) -> Result<(), EngineError> {
        Ok(())
    }

    async fn bandwidth(&self) -> BandwidthStats {
        BandwidthStats::default()
    }
}
