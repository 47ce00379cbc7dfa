use crate::device::{key_from_b64, peer_for, DeviceApi, InterfaceSpec, LinkStats};
use crate::error::Result;
use crate::store::{Client, Store};
use defguard_wireguard_rs::key::Key;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Keeps the device peer table a projection of the client directory.
///
/// Every device-mutating call goes through one mutex, so a startup
/// resync can never interleave with an incremental update. The directory
/// is the source of truth: a failed device call is reported but not
/// retried, and the next resync converges the device again.
pub struct Reconciler {
    device: Mutex<Box<dyn DeviceApi>>,
    store: Arc<Store>,
}

impl Reconciler {
    pub fn new(device: Box<dyn DeviceApi>, store: Arc<Store>) -> Self {
        Self {
            device: Mutex::new(device),
            store,
        }
    }

    /// Full resync: provision the interface if needed, then diff the
    /// device peer set against the directory. Stale peers are removed
    /// and every directory entry is (re)applied, so after a successful
    /// pass the device holds exactly the directory's public keys.
    ///
    /// Clients whose stored key no longer parses are logged and skipped;
    /// one bad record must not abort the pass. Individual device call
    /// failures are logged for the same reason.
    pub fn resync(&self, spec: &InterfaceSpec) -> Result<()> {
        let device = self.device();
        device.ensure_interface(spec)?;

        let mut desired: HashMap<Key, Client> = HashMap::new();
        for client in self.store.list_clients() {
            match key_from_b64(&client.public_key) {
                Ok(key) => {
                    desired.insert(key, client);
                }
                Err(e) => log::warn!(
                    "resync: skipping client {} ({}): {e}",
                    client.id,
                    client.name
                ),
            }
        }

        for key in device.peer_keys()? {
            if !desired.contains_key(&key) {
                if let Err(e) = device.remove_peer(&key) {
                    log::warn!("resync: could not remove stale peer: {e}");
                }
            }
        }
        for (key, client) in &desired {
            match peer_for(key, &client.allowed_ip4) {
                Ok(peer) => {
                    if let Err(e) = device.apply_peer(&peer) {
                        log::warn!("resync: could not configure client {}: {e}", client.id);
                    }
                }
                Err(e) => log::warn!(
                    "resync: skipping client {} ({}): {e}",
                    client.id,
                    client.name
                ),
            }
        }
        Ok(())
    }

    /// Incremental add after a directory create. Errors surface to the
    /// caller; the directory write stands either way.
    pub fn add_client(&self, client: &Client) -> Result<()> {
        let key = key_from_b64(&client.public_key)?;
        let peer = peer_for(&key, &client.allowed_ip4)?;
        self.device().apply_peer(&peer)
    }

    /// Incremental remove after a directory delete.
    pub fn remove_client(&self, client: &Client) -> Result<()> {
        let key = key_from_b64(&client.public_key)?;
        self.device().remove_peer(&key)
    }

    pub fn link_stats(&self) -> Result<HashMap<String, LinkStats>> {
        self.device().link_stats()
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.device().shutdown() {
            log::warn!("device shutdown failed: {e}");
        }
    }

    fn device(&self) -> MutexGuard<'_, Box<dyn DeviceApi>> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }
}
