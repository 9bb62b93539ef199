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

//! LibreSeed - decentralized package distribution over a BitTorrent-style
//! DHT used as an authenticated metadata store.
//!
//! This crate is the metadata core:
//! - Canonical record codec and signed record schemas
//! - Ed25519 keystore with encrypted-at-rest key files
//! - The seven-step dual-manifest validation pipeline
//! - DHT key derivation and a signature-verifying record store
//! - Multi-publisher name resolution under configurable policies
//! - Announce/SeederStatus republish scheduling with TTL tracking
//! - The seeder registry that gates what this node serves

/// Protocol core (codec, records, signing, packaging, validation).
pub mod core;
/// Authenticated DHT layer (keys, store, publish/resolve, republish).
pub mod dht;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// Seeder registry and engine seam.
pub mod seeder;
