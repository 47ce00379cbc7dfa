use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::{fs, path::Path};

/// An authorized VPN client. `allowed_ip4` is the single `/32` host
/// address assigned from the client subnet; both it and `public_key` are
/// unique across the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: u32,
    pub name: String,
    pub allowed_ip4: String,
    pub public_key: String,
}

/// An API user. The password is held only as an opaque hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub username: String,
    pub hash: String,
    pub role: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    next_client_id: u32,
    next_user_id: u32,
    clients: Vec<Client>,
    users: Vec<User>,
}

/// File-backed directory of clients and users.
///
/// Writes go through a single mutex and are persisted before the
/// in-memory state is committed, so identifiers are assigned atomically
/// and a failed write leaves the directory untouched. Iteration order is
/// the stored order.
pub struct Store {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            toml::from_str(&raw)
                .map_err(|e| Error::Storage(format!("cannot parse {}: {e}", path.display())))?
        } else {
            StoreData::default()
        };
        Ok(Store {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn list_clients(&self) -> Vec<Client> {
        self.lock().clients.clone()
    }

    pub fn find_client(&self, id: u32) -> Option<Client> {
        self.lock().clients.iter().find(|c| c.id == id).cloned()
    }

    /// Create a client, assigning the next identifier. The caller never
    /// chooses ids; the counter only moves forward, so deleted ids are
    /// not reused.
    pub fn create_client(&self, name: &str, allowed_ip4: &str, public_key: &str) -> Result<Client> {
        let mut data = self.lock();
        if data.clients.iter().any(|c| c.public_key == public_key) {
            return Err(Error::Validation("public key is already registered".into()));
        }
        if data.clients.iter().any(|c| c.allowed_ip4 == allowed_ip4) {
            return Err(Error::Validation(format!(
                "address {allowed_ip4} is already assigned"
            )));
        }
        let id = data.next_client_id + 1;
        let client = Client {
            id,
            name: name.to_string(),
            allowed_ip4: allowed_ip4.to_string(),
            public_key: public_key.to_string(),
        };
        data.next_client_id = id;
        data.clients.push(client.clone());
        if let Err(e) = persist(&self.path, &data) {
            data.clients.pop();
            data.next_client_id = id - 1;
            return Err(e);
        }
        Ok(client)
    }

    /// Remove a client. Removing an unknown id reports `NotFound` and
    /// leaves the store untouched.
    pub fn remove_client(&self, id: u32) -> Result<Client> {
        let mut data = self.lock();
        let pos = data
            .clients
            .iter()
            .position(|c| c.id == id)
            .ok_or(Error::NotFound)?;
        let removed = data.clients.remove(pos);
        if let Err(e) = persist(&self.path, &data) {
            data.clients.insert(pos, removed);
            return Err(e);
        }
        Ok(removed)
    }

    pub fn has_users(&self) -> bool {
        !self.lock().users.is_empty()
    }

    pub fn find_user(&self, username: &str) -> Option<User> {
        self.lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
    }

    /// Refresh hash and role of an existing user, or append a new one.
    /// As with clients, a failed write leaves the in-memory table as it
    /// was.
    pub fn upsert_user(&self, username: &str, hash: &str, role: &str) -> Result<User> {
        let mut data = self.lock();
        match data.users.iter().position(|u| u.username == username) {
            Some(pos) => {
                let previous = data.users[pos].clone();
                data.users[pos].hash = hash.to_string();
                data.users[pos].role = role.to_string();
                if let Err(e) = persist(&self.path, &data) {
                    data.users[pos] = previous;
                    return Err(e);
                }
                Ok(data.users[pos].clone())
            }
            None => {
                let id = data.next_user_id + 1;
                data.next_user_id = id;
                let user = User {
                    id,
                    username: username.to_string(),
                    hash: hash.to_string(),
                    role: role.to_string(),
                };
                data.users.push(user.clone());
                if let Err(e) = persist(&self.path, &data) {
                    data.users.pop();
                    data.next_user_id = id - 1;
                    return Err(e);
                }
                Ok(user)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        // a poisoned lock only means another thread panicked mid-read;
        // the data itself is always committed post-persist
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn persist(path: &Path, data: &StoreData) -> Result<()> {
    let s = toml::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("cannot serialize store: {e}")))?;
    fs::write(path, s)?;
    Ok(())
}
