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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Packages accepted by the dual-manifest validator.
    pub validate_accepted_total: IntCounter,
    /// Structural rejections.
    pub validate_rejected_structural_total: IntCounter,
    /// Cryptographic rejections (signatures, key binding).
    pub validate_rejected_crypto_total: IntCounter,
    /// Integrity rejections (infohash/contentHash/missing manifest).
    pub validate_rejected_integrity_total: IntCounter,

    /// DHT get attempts.
    pub dht_get_total: IntCounter,
    /// DHT gets that returned a verified record.
    pub dht_get_verified_total: IntCounter,
    /// DHT gets that failed or timed out on every replica.
    pub dht_get_failed_total: IntCounter,
    /// DHT put attempts.
    pub dht_put_total: IntCounter,
    /// DHT puts that failed or timed out.
    pub dht_put_failed_total: IntCounter,

    /// Successful republishes.
    pub republish_total: IntCounter,
    /// Failed republish attempts (retried with backoff).
    pub republish_failed_total: IntCounter,

    /// Packages currently seeded.
    pub seeded_packages: IntGauge,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let validate_accepted_total =
            IntCounter::new("libreseed_validate_accepted_total", "Packages accepted by validator")
                .map_err(|_| MetricsError::Prom)?;
        let validate_rejected_structural_total = IntCounter::new(
            "libreseed_validate_rejected_structural_total",
            "Structural validator rejections",
        )
        .map_err(|_| MetricsError::Prom)?;
        let validate_rejected_crypto_total = IntCounter::new(
            "libreseed_validate_rejected_crypto_total",
            "Cryptographic validator rejections",
        )
        .map_err(|_| MetricsError::Prom)?;
        let validate_rejected_integrity_total = IntCounter::new(
            "libreseed_validate_rejected_integrity_total",
            "Integrity validator rejections",
        )
        .map_err(|_| MetricsError::Prom)?;

        let dht_get_total = IntCounter::new("libreseed_dht_get_total", "DHT get attempts")
            .map_err(|_| MetricsError::Prom)?;
        let dht_get_verified_total =
            IntCounter::new("libreseed_dht_get_verified_total", "DHT gets returning verified records")
                .map_err(|_| MetricsError::Prom)?;
        let dht_get_failed_total =
            IntCounter::new("libreseed_dht_get_failed_total", "DHT gets failing on every replica")
                .map_err(|_| MetricsError::Prom)?;
        let dht_put_total = IntCounter::new("libreseed_dht_put_total", "DHT put attempts")
            .map_err(|_| MetricsError::Prom)?;
        let dht_put_failed_total =
            IntCounter::new("libreseed_dht_put_failed_total", "DHT puts failing or timing out")
                .map_err(|_| MetricsError::Prom)?;

        let republish_total = IntCounter::new("libreseed_republish_total", "Successful republishes")
            .map_err(|_| MetricsError::Prom)?;
        let republish_failed_total =
            IntCounter::new("libreseed_republish_failed_total", "Failed republish attempts")
                .map_err(|_| MetricsError::Prom)?;

        let seeded_packages = IntGauge::new("libreseed_seeded_packages", "Packages currently seeded")
            .map_err(|_| MetricsError::Prom)?;

        for c in [
            &validate_accepted_total,
            &validate_rejected_structural_total,
            &validate_rejected_crypto_total,
            &validate_rejected_integrity_total,
            &dht_get_total,
            &dht_get_verified_total,
            &dht_get_failed_total,
            &dht_put_total,
            &dht_put_failed_total,
            &republish_total,
            &republish_failed_total,
        ] {
            registry
                .register(Box::new(c.clone()))
                .map_err(|_| MetricsError::Prom)?;
        }
        registry
            .register(Box::new(seeded_packages.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            validate_accepted_total,
            validate_rejected_structural_total,
            validate_rejected_crypto_total,
            validate_rejected_integrity_total,
            dht_get_total,
            dht_get_verified_total,
            dht_get_failed_total,
            dht_put_total,
            dht_put_failed_total,
            republish_total,
            republish_failed_total,
            seeded_packages,
        })
    }
}
