use crate::auth::{self, CredentialService};
use crate::config::{ensure_server_keys, load_server_config, server_public_key_b64, ServerConfig};
use crate::device::{DeviceApi, InterfaceSpec, KernelDevice, MemoryDevice};
use crate::error::{Error, Result};
use crate::http_api::{self, AppState};
use crate::ip_pool;
use crate::reconciler::Reconciler;
use crate::store::Store;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Bring the whole server up: config, directory, users, device, resync,
/// admin API, then block until ctrl-c.
///
/// The startup resync runs to completion before the API starts
/// accepting requests, so an incremental update can never race a
/// resync in flight.
pub fn start(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = ensure_server_keys(load_server_config(config_path.clone())?, config_path)?;
    if cfg.endpoint.is_empty() {
        return Err(Error::Config(
            "endpoint must be set in the config file, e.g. vpn.example.com".into(),
        ));
    }

    // no directory, no server: storage being unavailable here is fatal
    let store = Arc::new(Store::open(&cfg.database_path)?);
    auth::init_users(&store, &cfg)?;

    let private_key_b64 = cfg
        .server_private_key_b64
        .clone()
        .ok_or_else(|| Error::Config("server private key missing".into()))?;
    let public_key_b64 = server_public_key_b64(&cfg)?;

    let device: Box<dyn DeviceApi> = if cfg.memory_device {
        log::warn!("using in-memory device backend, no packets will flow");
        Box::new(MemoryDevice::new())
    } else {
        Box::new(KernelDevice::new(&cfg.interface_name)?)
    };
    let reconciler = Arc::new(Reconciler::new(device, Arc::clone(&store)));

    let spec = interface_spec(&cfg, &private_key_b64)?;
    reconciler.resync(&spec)?;
    log::info!("resync complete, device matches the client directory");

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        store,
        reconciler: Arc::clone(&reconciler),
        credentials: Arc::new(CredentialService::new()),
        server_public_key_b64: public_key_b64.clone(),
    });
    http_api::spawn(state)?;

    log::info!("WireGuard gateway ready on UDP {}", cfg.listen_port);
    log::info!("server public key: {public_key_b64}");

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("ctrl-c received, shutting down");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Config(format!("could not install signal handler: {e}")))?;

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }
    reconciler.shutdown();
    log::info!("server stopped cleanly");
    Ok(())
}

pub fn interface_spec(cfg: &ServerConfig, private_key_b64: &str) -> Result<InterfaceSpec> {
    Ok(InterfaceSpec {
        name: cfg.interface_name.clone(),
        private_key_b64: private_key_b64.to_string(),
        address_cidr: ip_pool::gateway_cidr(&cfg.client_subnet)?,
        listen_port: cfg.listen_port,
    })
}
