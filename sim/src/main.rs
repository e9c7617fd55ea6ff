use std::net::SocketAddr;

use clap::Parser;
use gp_ota_core::scp02::StaticKeys;
use gp_ota_sim::uicc::Profile;
use gp_ota_sim::{connect_and_run, CardSimulatorConfig, VirtualUicc};
use log::{info, LevelFilter};

/// Card Simulator: connects to an Admin Server over PSK-TLS and drives a
/// Virtual UICC through the Amendment B remote administration session.
#[derive(Clone, Debug, Parser)]
struct Options {
    /// Admin Server address to connect to
    #[clap(long, default_value = "127.0.0.1:8443")]
    server: SocketAddr,

    /// Admin path (must match the server's configured path)
    #[clap(long, default_value = "/admin")]
    admin_path: String,

    /// PSK identity, e.g. //se/iccid/89000000000000000000
    #[clap(long)]
    psk_identity: String,

    /// PSK key, hex encoded
    #[clap(long)]
    psk_key: String,

    /// X-Admin-From header to send on the initial POST
    #[clap(long)]
    admin_from: Option<String>,

    /// Log level
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Options::parse();
    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default()).ok();

    let psk_key = hex::decode(&args.psk_key)?;
    let config = CardSimulatorConfig { admin_path: args.admin_path, admin_from: args.admin_from, ..CardSimulatorConfig::default() };

    let mut uicc = VirtualUicc::new(Profile::default_isd(), StaticKeys::default_test_keys());

    info!("connecting to {} as {}", args.server, args.psk_identity);
    let info = connect_and_run(args.server, args.psk_identity.into_bytes(), psk_key, &config, &mut uicc).await?;
    info!("session complete, negotiated cipher: {}", info.cipher_suite);

    Ok(())
}
