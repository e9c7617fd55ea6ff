//! `gp-ota-serverd`: the Admin Server binary. A thin CLI wrapper around
//! [`gp_ota_server::AdminServer`] -- argument parsing and process lifecycle
//! only, matching the teacher's `Options`/`Actions` CLI split.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gp_ota_server::{admin, AdminServer, AdminServerConfig, InMemoryPskStore};
use log::LevelFilter;

/// GlobalPlatform Amendment B Admin Server -- drives APDU exchange
/// sessions with cards/simulators over PSK-TLS.
#[derive(Parser, Debug)]
#[clap(name = "gp-ota-serverd")]
struct Options {
    /// Address to bind the PSK-TLS listener on.
    #[clap(long, default_value = "0.0.0.0:8443")]
    bind: String,

    /// Admin HTTP path (see spec.md section 6).
    #[clap(long, default_value = "/admin")]
    admin_path: String,

    /// Session idle timeout in seconds before the reaper times it out.
    #[clap(long, default_value = "300")]
    idle_timeout_secs: u64,

    /// One or more `identity:hex_key` pairs for the PSK key store. Repeat
    /// for multiple cards.
    #[clap(long = "psk", value_name = "IDENTITY:HEX_KEY")]
    psk_entries: Vec<String>,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

fn build_psk_store(entries: &[String]) -> Result<InMemoryPskStore> {
    let mut store = InMemoryPskStore::new();
    for entry in entries {
        let (identity, hex_key) = entry
            .split_once(':')
            .with_context(|| format!("malformed --psk entry (want identity:hex_key): {entry}"))?;
        let key = hex::decode(hex_key).with_context(|| format!("invalid hex key for identity {identity}"))?;
        store.insert(identity.as_bytes().to_vec(), key);
    }
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Options::parse();

    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default()).unwrap();

    let psk_store = build_psk_store(&args.psk_entries)?;

    let config = AdminServerConfig {
        bind_address: args.bind.clone(),
        admin_path: args.admin_path,
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        ..AdminServerConfig::default()
    };

    let server = Arc::new(AdminServer::new(config.clone(), Arc::new(psk_store))?);
    let _reaper = server.registry.spawn_reaper(config.idle_timeout);

    let listener = admin::default_listener(&args.bind).await?;
    log::info!("gp-ota-serverd listening on {}", args.bind);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.accept_loop(listener, shutdown_rx).await;
    Ok(())
}
