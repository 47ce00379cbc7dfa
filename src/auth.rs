use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use pbkdf2::password_hash::rand_core::OsRng;
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{distributions::Alphanumeric, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// The token expires five minutes before its signature cookie does, so
/// the server-side expiry check always fires first.
pub const TOKEN_LIFETIME_SECS: u64 = 115 * 60;
pub const COOKIE_LIFETIME_SECS: u64 = 2 * 3600;

const ALGORITHM: &str = "HS256";

/// The two halves of a split credential. `token` (`header.claims`) goes
/// back in the response body for the caller to resend in the
/// `Authorization` header; `signature` travels only in the `auth` cookie.
/// An attacker who can read script-accessible storage gets neither a
/// complete credential nor the means to forge one.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: String,
    pub signature: String,
}

#[derive(Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

#[derive(Serialize, Deserialize)]
struct TokenClaims {
    username: String,
    exp: u64,
}

/// Issues and verifies session tokens with a signing key generated at
/// construction and held only in memory. Restarting the process
/// invalidates every outstanding token.
pub struct CredentialService {
    signing_key: [u8; 32],
}

impl CredentialService {
    pub fn new() -> Self {
        let mut signing_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut signing_key);
        Self { signing_key }
    }

    /// Check username and password against the user table and mint a
    /// credential. Unknown user, empty password and wrong password all
    /// collapse into the same `AuthFailure`.
    pub fn issue(&self, store: &Store, username: &str, password: &str) -> Result<Credentials> {
        if password.is_empty() {
            return Err(Error::AuthFailure);
        }
        let user = store.find_user(username).ok_or(Error::AuthFailure)?;
        if !verify_password(password, &user.hash) {
            return Err(Error::AuthFailure);
        }
        self.issue_with_expiry(username, unix_now() + TOKEN_LIFETIME_SECS)
    }

    /// Sign a token with an explicit expiry. `issue` is the normal entry
    /// point; this one exists so expiry handling can be exercised
    /// directly.
    pub fn issue_with_expiry(&self, username: &str, exp: u64) -> Result<Credentials> {
        let header = serde_json::to_vec(&TokenHeader {
            alg: ALGORITHM.into(),
            typ: "JWT".into(),
        })
        .map_err(|e| Error::Config(format!("could not encode token header: {e}")))?;
        let claims = serde_json::to_vec(&TokenClaims {
            username: username.to_string(),
            exp,
        })
        .map_err(|e| Error::Config(format!("could not encode token claims: {e}")))?;
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| Error::Config(format!("could not build signer: {e}")))?;
        mac.update(token.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(Credentials { token, signature })
    }

    /// Recombine the caller-supplied token with the cookie-held signature
    /// and verify it. Returns the authenticated username.
    pub fn verify(&self, token: &str, signature: &str) -> Result<String> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), None) => (h, c),
            _ => return Err(Error::AuthFailure),
        };
        let header: TokenHeader = decode_part(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(Error::AuthFailure);
        }
        let sig = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| Error::AuthFailure)?;
        let mut mac =
            HmacSha256::new_from_slice(&self.signing_key).map_err(|_| Error::AuthFailure)?;
        mac.update(token.as_bytes());
        mac.verify_slice(&sig).map_err(|_| Error::AuthFailure)?;
        let claims: TokenClaims = decode_part(claims_b64)?;
        if claims.exp <= unix_now() {
            return Err(Error::AuthFailure);
        }
        Ok(claims.username)
    }
}

impl Default for CredentialService {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_part<T: serde::de::DeserializeOwned>(b64: &str) -> Result<T> {
    let raw = URL_SAFE_NO_PAD.decode(b64).map_err(|_| Error::AuthFailure)?;
    serde_json::from_slice(&raw).map_err(|_| Error::AuthFailure)
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Pbkdf2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Config(format!("could not hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Reconcile configured users into the store: matching usernames get
/// their hash and role refreshed, the rest are appended. When the store
/// ends up empty an admin account is generated and its password logged
/// once; it is not retrievable afterwards.
pub fn init_users(store: &Store, cfg: &ServerConfig) -> Result<()> {
    for entry in &cfg.users {
        let mut parts = entry.splitn(3, ':');
        let (username, password) = match (parts.next(), parts.next()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u, p),
            _ => {
                return Err(Error::Config(format!(
                    "user entry {entry:?} must be username:password[:role]"
                )))
            }
        };
        let role = parts.next().unwrap_or("admin");
        let hash = hash_password(password)?;
        store.upsert_user(username, &hash, role)?;
    }
    if !store.has_users() {
        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();
        let hash = hash_password(&password)?;
        store.upsert_user("admin", &hash, "admin")?;
        log::warn!("no users configured, created admin user with password: {password}");
    }
    Ok(())
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
