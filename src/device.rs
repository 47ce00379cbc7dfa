use crate::error::{Error, Result};
use base64::{engine::general_purpose, Engine as _};
use defguard_wireguard_rs::{
    host::Peer, key::Key, net::IpAddrMask, InterfaceConfiguration, Kernel, WGApi,
    WireguardInterfaceApi,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

/// Everything needed to bring up the tunnel interface.
#[derive(Debug, Clone)]
pub struct InterfaceSpec {
    pub name: String,
    pub private_key_b64: String,
    /// Gateway address with subnet prefix, e.g. `10.0.0.1/24`.
    pub address_cidr: String,
    pub listen_port: u16,
}

/// Live per-peer counters, keyed by base64 public key.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStats {
    /// Seconds since epoch of the last completed handshake.
    pub latest_handshake: Option<u64>,
    pub endpoint: Option<String>,
    pub sent_bytes: u64,
    pub received_bytes: u64,
}

/// Seam in front of the tunnel implementation. The reconciler is the
/// only component that calls the mutating half.
pub trait DeviceApi: Send {
    /// Provision the interface if it does not exist yet.
    fn ensure_interface(&self, spec: &InterfaceSpec) -> Result<()>;
    fn peer_keys(&self) -> Result<Vec<Key>>;
    /// Add or update a single peer without touching the rest.
    fn apply_peer(&self, peer: &Peer) -> Result<()>;
    fn remove_peer(&self, key: &Key) -> Result<()>;
    fn link_stats(&self) -> Result<HashMap<String, LinkStats>>;
    fn shutdown(&self) -> Result<()>;
}

/// Decode a base64 peer public key, enforcing the 32-byte length.
pub fn key_from_b64(b64: &str) -> Result<Key> {
    let bytes = general_purpose::STANDARD
        .decode(b64)
        .map_err(|_| Error::Validation("public key is not valid base64".into()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Validation("public key must be 32 bytes".into()))?;
    Ok(Key::new(bytes))
}

pub fn key_to_b64(key: &Key) -> String {
    general_purpose::STANDARD.encode(key.as_slice())
}

pub fn validate_public_key_b64(b64: &str) -> Result<()> {
    key_from_b64(b64).map(|_| ())
}

/// Kernel-backed device driven through `defguard_wireguard_rs`.
pub struct KernelDevice {
    api: WGApi<Kernel>,
}

impl KernelDevice {
    pub fn new(ifname: &str) -> Result<Self> {
        let api = WGApi::<Kernel>::new(ifname.to_string()).map_err(device_err)?;
        Ok(Self { api })
    }
}

impl DeviceApi for KernelDevice {
    fn ensure_interface(&self, spec: &InterfaceSpec) -> Result<()> {
        if self.api.read_interface_data().is_ok() {
            return Ok(());
        }
        self.api.create_interface().map_err(device_err)?;
        let config = InterfaceConfiguration {
            name: spec.name.clone(),
            prvkey: spec.private_key_b64.clone(),
            addresses: vec![spec.address_cidr.parse().map_err(device_err)?],
            port: spec.listen_port as u32,
            peers: Vec::new(),
            mtu: Some(crate::config::MTU),
        };
        #[cfg(target_os = "windows")]
        self.api
            .configure_interface(&config, &[], &[])
            .map_err(device_err)?;
        #[cfg(not(target_os = "windows"))]
        self.api.configure_interface(&config).map_err(device_err)?;
        Ok(())
    }

    fn peer_keys(&self) -> Result<Vec<Key>> {
        let data = self.api.read_interface_data().map_err(device_err)?;
        Ok(data.peers.keys().cloned().collect())
    }

    fn apply_peer(&self, peer: &Peer) -> Result<()> {
        self.api.configure_peer(peer).map_err(device_err)
    }

    fn remove_peer(&self, key: &Key) -> Result<()> {
        self.api.remove_peer(key).map_err(device_err)
    }

    fn link_stats(&self) -> Result<HashMap<String, LinkStats>> {
        let data = self.api.read_interface_data().map_err(device_err)?;
        let mut stats = HashMap::new();
        for (key, peer) in &data.peers {
            stats.insert(
                key_to_b64(key),
                LinkStats {
                    latest_handshake: peer
                        .last_handshake
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs()),
                    endpoint: peer.endpoint.map(|e| e.to_string()),
                    sent_bytes: peer.tx_bytes,
                    received_bytes: peer.rx_bytes,
                },
            );
        }
        Ok(stats)
    }

    fn shutdown(&self) -> Result<()> {
        self.api.remove_interface().map_err(device_err)
    }
}

fn device_err(e: impl Display) -> Error {
    Error::Device(e.to_string())
}

/// In-memory peer table for hosts without a WireGuard kernel module and
/// for the test suite. Tracks configuration faithfully; moves no
/// packets, so all link stats stay at zero.
#[derive(Clone, Default)]
pub struct MemoryDevice {
    peers: Arc<Mutex<HashMap<Key, Peer>>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_peer(&self, key: Key) {
        let peer = Peer::new(key.clone());
        self.peers().insert(key, peer);
    }

    pub fn peer_count(&self) -> usize {
        self.peers().len()
    }

    pub fn has_peer(&self, key: &Key) -> bool {
        self.peers().contains_key(key)
    }

    pub fn allowed_ips(&self, key: &Key) -> Vec<String> {
        self.peers()
            .get(key)
            .map(|p| p.allowed_ips.iter().map(|ip| ip.to_string()).collect())
            .unwrap_or_default()
    }

    fn peers(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Peer>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceApi for MemoryDevice {
    fn ensure_interface(&self, _spec: &InterfaceSpec) -> Result<()> {
        Ok(())
    }

    fn peer_keys(&self) -> Result<Vec<Key>> {
        Ok(self.peers().keys().cloned().collect())
    }

    fn apply_peer(&self, peer: &Peer) -> Result<()> {
        self.peers().insert(peer.public_key.clone(), peer.clone());
        Ok(())
    }

    fn remove_peer(&self, key: &Key) -> Result<()> {
        self.peers().remove(key);
        Ok(())
    }

    fn link_stats(&self) -> Result<HashMap<String, LinkStats>> {
        Ok(self
            .peers()
            .keys()
            .map(|k| (key_to_b64(k), LinkStats::default()))
            .collect())
    }

    fn shutdown(&self) -> Result<()> {
        self.peers().clear();
        Ok(())
    }
}

/// Build the device peer entry for a client: its public key with the
/// assigned `/32` as the only allowed address.
pub fn peer_for(key: &Key, allowed_ip4: &str) -> Result<Peer> {
    let mut peer = Peer::new(key.clone());
    peer.allowed_ips.push(
        IpAddrMask::from_str(allowed_ip4)
            .map_err(|e| Error::Validation(format!("invalid client address {allowed_ip4:?}: {e}")))?,
    );
    Ok(peer)
}
