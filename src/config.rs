use crate::error::{Error, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/// MTU recommended to clients in `GET /api/config`.
pub const MTU: u32 = 1420;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub interface_name: String,
    /// Subnet client addresses are allocated from. The first usable
    /// address is reserved for the gateway itself.
    pub client_subnet: String,
    pub listen_port: u16,
    /// Public host clients connect to, e.g. `vpn.example.com`.
    pub endpoint: String,
    pub recommended_dns: String,
    pub http_port: u16,
    pub database_path: String,
    pub static_dir: Option<String>,
    /// API users as `username:password[:role]`, reconciled into the user
    /// table at startup. When empty and the store holds no users, a
    /// random admin password is generated and logged once.
    pub users: Vec<String>,
    pub server_private_key_b64: Option<String>,
    /// Track the peer table in memory instead of a kernel interface.
    /// Useful on hosts without a WireGuard module; no packets flow.
    pub memory_device: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface_name: "wg0".into(),
            client_subnet: "10.0.0.0/24".into(),
            listen_port: 51820,
            endpoint: String::new(),
            recommended_dns: "1.1.1.1".into(),
            http_port: 8443,
            database_path: "wg-admin.db.toml".into(),
            static_dir: Some("public".into()),
            users: Vec::new(),
            server_private_key_b64: None,
            memory_device: false,
        }
    }
}

pub fn load_server_config(path: Option<PathBuf>) -> Result<ServerConfig> {
    let p = path.unwrap_or_else(|| PathBuf::from("wg-admin.toml"));
    if !p.exists() {
        let def = ServerConfig::default();
        let s = toml::to_string_pretty(&def)
            .map_err(|e| Error::Config(format!("could not serialize default config: {e}")))?;
        fs::write(&p, s)?;
        return Ok(def);
    }
    let s = fs::read_to_string(&p)?;
    let cfg: ServerConfig =
        toml::from_str(&s).map_err(|e| Error::Config(format!("{}: {e}", p.display())))?;
    Ok(cfg)
}

/// Generate the server keypair on first run and write it back to the
/// config file. Regenerating the key breaks every existing client, so an
/// existing key is always kept as-is.
pub fn ensure_server_keys(mut cfg: ServerConfig, path: Option<PathBuf>) -> Result<ServerConfig> {
    if cfg.server_private_key_b64.is_some() {
        return Ok(cfg);
    }
    let secret = x25519_dalek::StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = x25519_dalek::PublicKey::from(&secret);
    let priv_b64 = base64::engine::general_purpose::STANDARD.encode(secret.to_bytes());
    cfg.server_private_key_b64 = Some(priv_b64);
    let p = path.unwrap_or_else(|| PathBuf::from("wg-admin.toml"));
    let s = toml::to_string_pretty(&cfg)
        .map_err(|e| Error::Config(format!("could not serialize config: {e}")))?;
    fs::write(p, s)?;
    log::info!(
        "generated server keypair, public key: {}",
        base64::engine::general_purpose::STANDARD.encode(public.as_bytes())
    );
    Ok(cfg)
}

/// Derive the base64 public key from the configured private key.
pub fn server_public_key_b64(cfg: &ServerConfig) -> Result<String> {
    let b64 = cfg
        .server_private_key_b64
        .as_deref()
        .ok_or_else(|| Error::Config("server private key missing; run `wg-admin init`".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| Error::Config(format!("invalid server private key: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Config("server private key must be 32 bytes".into()))?;
    let public = x25519_dalek::PublicKey::from(&x25519_dalek::StaticSecret::from(bytes));
    Ok(base64::engine::general_purpose::STANDARD.encode(public.as_bytes()))
}
