#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! LibreSeed seeder daemon entrypoint (systemd-friendly).
//! Wires the keystore, registry, DHT store, and republish scheduler, then
//! waits for a shutdown signal.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use libreseed::core::security::keystore::Keystore;
use libreseed::core::types::CoreConfig;
use libreseed::dht::publish::Publisher;
use libreseed::dht::republish::spawn_republisher;
use libreseed::dht::store::RecordStore;
use libreseed::dht::substrate::{DhtSubstrate, SledSubstrate};
use libreseed::monitoring::metrics::Metrics;
use libreseed::seeder::engine::NoopEngine;
use libreseed::seeder::registry::SeederRegistry;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_config() -> CoreConfig {
    let path = env("LIBRESEED_CONFIG", "libreseed.toml");
    let mut cfg: CoreConfig = match std::fs::read_to_string(&path) {
        Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
            eprintln!("bad config {path}: {e}");
            std::process::exit(2);
        }),
        Err(_) => CoreConfig::default(),
    };
    // env override for the one knob deployments always set
    if let Ok(dir) = std::env::var("LIBRESEED_DATA_DIR") {
        cfg.node.data_dir = dir;
    }
    cfg
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let cfg = load_config();
    let data_dir = cfg.node.data_dir.clone();
    info!(data_dir = %data_dir, "libreseed seeder starting");

    let metrics = Arc::new(Metrics::new().expect("metrics init failed"));

    // Keystore open failure is fatal.
    let keystore = match Keystore::open(&data_dir) {
        Ok(ks) => Arc::new(ks),
        Err(e) => {
            eprintln!("keystore open failed: {e}");
            std::process::exit(1);
        }
    };

    let substrate: Arc<dyn DhtSubstrate> =
        match SledSubstrate::open(&format!("{data_dir}/dht-cache")) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                eprintln!("dht cache open failed: {e}");
                std::process::exit(1);
            }
        };

    let store = RecordStore::new(
        substrate,
        cfg.store.clone(),
        cfg.ttl.clone(),
        cfg.limits.clone(),
        Arc::clone(&metrics),
    );
    let publisher = Arc::new(Publisher::new(
        store.clone(),
        Arc::clone(&keystore),
        cfg.limits.clone(),
    ));

    // The piece-exchange engine runs out of process; its in-process stand-in
    // seeds nothing.
    let engine = Arc::new(NoopEngine);

    // Registry open failure is fatal.
    let registry = match SeederRegistry::open(
        &data_dir,
        engine,
        Arc::clone(&publisher),
        Arc::clone(&keystore),
        Arc::clone(&metrics),
    )
    .await
    {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("registry open failed: {e}");
            std::process::exit(1);
        }
    };

    // Seeder identity: first loaded keypair, or a fresh one.
    let seeder_identity = match keystore.public_keys().first() {
        Some(pk) => keystore.handle(pk),
        None => match keystore.generate() {
            Ok(h) => {
                info!(pubkey = %h.public_key(), "generated seeder identity");
                Some(h)
            }
            Err(e) => {
                warn!(err = %e, "seeder identity unavailable; status publishing disabled");
                None
            }
        },
    };

    let cancel = CancellationToken::new();
    let republisher = spawn_republisher(
        Arc::clone(&publisher),
        Arc::clone(&registry),
        Arc::clone(&keystore),
        seeder_identity,
        cfg.republish.clone(),
        Arc::clone(&metrics),
        cancel.clone(),
    );

    info!(seeded = registry.list().await.len(), "libreseed seeder running");

    shutdown_signal().await;
    info!("shutdown signal received");
    cancel.cancel();
    republisher.join().await;
    info!("libreseed seeder stopped");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
