use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wg_admin::config::{ensure_server_keys, load_server_config};
use wg_admin::device::{DeviceApi, KernelDevice};
use wg_admin::error::Error;
use wg_admin::runtime;
use wg_admin::store::Store;

fn main() -> Result<(), Error> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Init => {
            let cfg = load_server_config(cli.config.clone())?;
            let _ = ensure_server_keys(cfg, cli.config)?;
        }
        Cmd::Start => {
            runtime::start(cli.config)?;
        }
        Cmd::ListClients => {
            let cfg = load_server_config(cli.config)?;
            let store = Store::open(&cfg.database_path)?;
            for c in store.list_clients() {
                println!("{} {} {} {}", c.id, c.name, c.allowed_ip4, c.public_key);
            }
        }
        Cmd::Status => {
            let cfg = load_server_config(cli.config)?;
            let device = KernelDevice::new(&cfg.interface_name)?;
            for (pk, s) in device.link_stats()? {
                let hs = s.latest_handshake.is_some();
                println!(
                    "{} {} {} KB {} KB",
                    pk,
                    hs,
                    s.sent_bytes / 1024,
                    s.received_bytes / 1024
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "wg-admin")]
#[command(version, about = "WireGuard VPN gateway admin server")]
struct Cli {
    /// Path to the server configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Write the default configuration and generate server keys
    Init,
    /// Resync the device and serve the admin API
    Start,
    /// List clients from the directory
    ListClients,
    /// Show live per-peer handshake and transfer counters
    Status,
}
