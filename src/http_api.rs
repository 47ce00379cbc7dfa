use crate::auth::{self, CredentialService};
use crate::config::{self, ServerConfig};
use crate::device::{validate_public_key_b64, LinkStats};
use crate::error::{Error, Result};
use crate::ip_pool;
use crate::reconciler::Reconciler;
use crate::store::{Client, Store};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use std::{fs, thread};
use tiny_http::{Header, Method, Request, Response, Server};

const WORKERS: usize = 4;
const MAX_BODY_BYTES: u64 = 1_048_576;

type Reply = Response<io::Cursor<Vec<u8>>>;

/// Shared context handed to every request handler. Built once at
/// startup; the signing key and device handle live here instead of in
/// globals.
pub struct AppState {
    pub cfg: ServerConfig,
    pub store: Arc<Store>,
    pub reconciler: Arc<Reconciler>,
    pub credentials: Arc<CredentialService>,
    pub server_public_key_b64: String,
}

/// Bind the admin API and serve it from a small worker pool sharing one
/// listening socket. Returns once the socket is bound; the workers run
/// for the life of the process.
pub fn spawn(state: Arc<AppState>) -> Result<()> {
    let bind_addr = std::env::var("WG_ADMIN_HTTP_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let bind = format!("{bind_addr}:{}", state.cfg.http_port);
    let server = Server::http(&bind)
        .map_err(|e| Error::Config(format!("could not bind admin API on {bind}: {e}")))?;
    let server = Arc::new(server);
    for _ in 0..WORKERS {
        let server = Arc::clone(&server);
        let state = Arc::clone(&state);
        thread::spawn(move || loop {
            match server.recv() {
                Ok(req) => handle(&state, req),
                Err(e) => {
                    log::warn!("admin API receive failed: {e}");
                    break;
                }
            }
        });
    }
    log::info!("admin API listening on http://{bind}");
    Ok(())
}

fn handle(state: &AppState, mut req: Request) {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.url().split('?').next().unwrap_or("/").to_string();
    let response = route(state, &mut req, &method, &path);
    log::info!(
        "{} {} -> {} ({:?})",
        method,
        path,
        response.status_code().0,
        start.elapsed()
    );
    let _ = req.respond(response);
}

fn route(state: &AppState, req: &mut Request, method: &Method, path: &str) -> Reply {
    if method == &Method::Post && path == "/api/authenticate" {
        return authenticate(state, req);
    }
    if let Some(rest) = path.strip_prefix("/api/") {
        // every other /api route sits behind the credential check
        let _username = match authorize(state, req) {
            Ok(username) => username,
            Err(_) => {
                log::info!("{method} {path} (auth denied)");
                return text_reply(401, "Unauthorized");
            }
        };
        return match (method, rest) {
            (Method::Get, "clients") => list_clients(state),
            (Method::Post, "clients") => create_client(state, req),
            (Method::Get, "config") => get_config(state),
            (Method::Get, rest) if rest.starts_with("clients/") => match parse_id(rest) {
                Some(id) => show_client(state, id),
                None => text_reply(404, "Not Found"),
            },
            (Method::Delete, rest) if rest.starts_with("clients/") => match parse_id(rest) {
                Some(id) => delete_client(state, id),
                None => text_reply(404, "Not Found"),
            },
            _ => text_reply(404, "Not Found"),
        };
    }
    if method == &Method::Get || method == &Method::Head {
        return serve_static(state, path);
    }
    text_reply(404, "Not Found")
}

fn parse_id(rest: &str) -> Option<u32> {
    rest.strip_prefix("clients/")?.parse().ok()
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

fn authenticate(state: &AppState, req: &mut Request) -> Reply {
    let login: LoginRequest = match read_json(req) {
        Ok(login) => login,
        Err(_) => return text_reply(400, "Bad Request"),
    };
    match state
        .credentials
        .issue(&state.store, &login.username, &login.password)
    {
        Ok(creds) => {
            let cookie = format!(
                "auth={}; Max-Age={}; Path=/; Secure; HttpOnly; SameSite=Lax",
                creds.signature,
                auth::COOKIE_LIFETIME_SECS
            );
            json_reply(200, &serde_json::json!({ "token": creds.token }))
                .with_header(header("Set-Cookie", &cookie))
        }
        // unknown user, wrong password, empty password: all the same 401
        Err(_) => text_reply(401, "Unauthorized"),
    }
}

/// Reassemble the split credential from the `Authorization` header and
/// the `auth` cookie and verify it.
fn authorize(state: &AppState, req: &Request) -> Result<String> {
    let authorization = header_value(req, "Authorization").unwrap_or_default();
    let mut parts = authorization.split_whitespace();
    let token = match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None)
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
        {
            token.to_string()
        }
        _ => return Err(Error::AuthFailure),
    };
    let signature = cookie_value(req, "auth").ok_or(Error::AuthFailure)?;
    state.credentials.verify(&token, &signature)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientResponse {
    #[serde(flatten)]
    client: Client,
    latest_handshake: Option<u64>,
    endpoint: Option<String>,
    sent_bytes: u64,
    received_bytes: u64,
}

impl ClientResponse {
    fn new(client: Client, stats: Option<&LinkStats>) -> Self {
        let stats = stats.cloned().unwrap_or_default();
        Self {
            client,
            latest_handshake: stats.latest_handshake,
            endpoint: stats.endpoint,
            sent_bytes: stats.sent_bytes,
            received_bytes: stats.received_bytes,
        }
    }
}

fn list_clients(state: &AppState) -> Reply {
    let stats = state.reconciler.link_stats().unwrap_or_else(|e| {
        log::warn!("could not read link stats: {e}");
        Default::default()
    });
    let clients: Vec<ClientResponse> = state
        .store
        .list_clients()
        .into_iter()
        .map(|c| {
            let s = stats.get(&c.public_key);
            ClientResponse::new(c, s)
        })
        .collect();
    json_reply(200, &clients)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewClientRequest {
    name: String,
    public_key: String,
    /// Optional caller-chosen address; allocated from the pool when
    /// absent.
    #[serde(default)]
    allowed_ip4: Option<String>,
}

fn create_client(state: &AppState, req: &mut Request) -> Reply {
    let body: NewClientRequest = match read_json(req) {
        Ok(body) => body,
        Err(_) => return text_reply(400, "Bad Request"),
    };
    if body.name.trim().is_empty() {
        return text_reply(422, "name must not be empty");
    }
    if let Err(e) = validate_public_key_b64(&body.public_key) {
        return text_reply(422, &e.to_string());
    }
    let assigned = assigned_addresses(state);
    let allowed_ip4 = match body.allowed_ip4 {
        Some(requested) => match validate_requested_address(state, &requested, &assigned) {
            Ok(address) => address,
            Err(e) => return text_reply(422, &e.to_string()),
        },
        None => match ip_pool::allocate(&state.cfg.client_subnet, &assigned) {
            Ok(ip) => format!("{ip}/32"),
            Err(Error::AllocationExhausted) => {
                log::error!("client subnet {} is exhausted", state.cfg.client_subnet);
                return text_reply(500, "no available addresses in client subnet");
            }
            Err(e) => return text_reply(500, &e.to_string()),
        },
    };
    let client = match state
        .store
        .create_client(body.name.trim(), &allowed_ip4, &body.public_key)
    {
        Ok(client) => client,
        Err(Error::Validation(msg)) => return text_reply(422, &msg),
        Err(e) => return text_reply(500, &e.to_string()),
    };
    if let Err(e) = state.reconciler.add_client(&client) {
        // directory write stands; the device converges at the next resync
        log::error!("client {} stored but device update failed: {e}", client.id);
        return text_reply(500, "client stored but device update failed");
    }
    json_reply(201, &ClientResponse::new(client, None))
}

fn validate_requested_address(
    state: &AppState,
    requested: &str,
    assigned: &[Ipv4Addr],
) -> Result<String> {
    let ip: Ipv4Addr = requested
        .strip_suffix("/32")
        .unwrap_or(requested)
        .parse()
        .map_err(|_| Error::Validation(format!("invalid address {requested:?}")))?;
    if ip == ip_pool::gateway(&state.cfg.client_subnet)? {
        return Err(Error::Validation(format!("{ip} is reserved for the gateway")));
    }
    // also rejects the network and broadcast addresses
    if !ip_pool::is_allocatable(&state.cfg.client_subnet, ip)? {
        return Err(Error::Validation(format!(
            "{ip} is not an assignable address in the client subnet"
        )));
    }
    if assigned.contains(&ip) {
        return Err(Error::Validation(format!("{ip} is already assigned")));
    }
    Ok(format!("{ip}/32"))
}

fn show_client(state: &AppState, id: u32) -> Reply {
    match state.store.find_client(id) {
        Some(client) => {
            let stats = state.reconciler.link_stats().unwrap_or_default();
            let s = stats.get(&client.public_key);
            json_reply(200, &ClientResponse::new(client, s))
        }
        None => text_reply(404, "Not Found"),
    }
}

fn delete_client(state: &AppState, id: u32) -> Reply {
    let client = match state.store.remove_client(id) {
        Ok(client) => client,
        Err(Error::NotFound) => return text_reply(404, "Not Found"),
        Err(e) => return text_reply(500, &e.to_string()),
    };
    if let Err(e) = state.reconciler.remove_client(&client) {
        log::error!("client {} deleted but device update failed: {e}", client.id);
        return text_reply(500, "client deleted but device update failed");
    }
    text_reply(204, "")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigResponse {
    endpoint: String,
    next_available_ip4: String,
    public_key: String,
    #[serde(rename = "recommendedDNS")]
    recommended_dns: String,
    mtu: u32,
}

fn get_config(state: &AppState) -> Reply {
    let assigned = assigned_addresses(state);
    let next_available_ip4 = match ip_pool::allocate(&state.cfg.client_subnet, &assigned) {
        Ok(ip) => format!("{ip}/32"),
        Err(Error::AllocationExhausted) => {
            log::warn!("no addresses left in client subnet");
            String::new()
        }
        Err(e) => {
            log::warn!("could not compute next address: {e}");
            String::new()
        }
    };
    json_reply(
        200,
        &ConfigResponse {
            endpoint: format!("{}:{}", state.cfg.endpoint, state.cfg.listen_port),
            next_available_ip4,
            public_key: state.server_public_key_b64.clone(),
            recommended_dns: state.cfg.recommended_dns.clone(),
            mtu: config::MTU,
        },
    )
}

fn assigned_addresses(state: &AppState) -> Vec<Ipv4Addr> {
    let cidrs: Vec<String> = state
        .store
        .list_clients()
        .into_iter()
        .map(|c| c.allowed_ip4)
        .collect();
    ip_pool::assigned_addresses(cidrs.iter().map(String::as_str))
}

fn serve_static(state: &AppState, path: &str) -> Reply {
    let Some(dir) = &state.cfg.static_dir else {
        return text_reply(404, "Not Found");
    };
    let base = PathBuf::from(dir);
    let rel = path.trim_start_matches('/');
    if rel.contains("..") {
        return text_reply(404, "Not Found");
    }
    let file = if rel.is_empty() {
        base.join("index.html")
    } else {
        base.join(rel)
    };
    match fs::read(&file) {
        Ok(body) => html_reply(body),
        // unknown paths fall back to the UI entry point
        Err(_) => match fs::read(base.join("index.html")) {
            Ok(body) => html_reply(body),
            Err(_) => text_reply(404, "Not Found"),
        },
    }
}

fn read_json<T: serde::de::DeserializeOwned>(req: &mut Request) -> Result<T> {
    let mut body = String::new();
    req.as_reader()
        .take(MAX_BODY_BYTES)
        .read_to_string(&mut body)
        .map_err(|e| Error::Validation(format!("could not read body: {e}")))?;
    serde_json::from_str(&body).map_err(|e| Error::Validation(format!("could not parse body: {e}")))
}

fn header_value(req: &Request, name: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

fn cookie_value(req: &Request, name: &str) -> Option<String> {
    let cookies = header_value(req, "Cookie")?;
    for pair in cookies.split(';') {
        if let Some((k, v)) = pair.trim().split_once('=') {
            if k == name {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap()
}

fn text_reply(code: u16, body: &str) -> Reply {
    Response::from_string(body).with_status_code(code)
}

fn json_reply(code: u16, body: &impl Serialize) -> Reply {
    let body = serde_json::to_string(body).unwrap_or_else(|_| "{}".into());
    Response::from_string(body)
        .with_status_code(code)
        .with_header(header("Content-Type", "application/json; charset=utf-8"))
}

fn html_reply(body: Vec<u8>) -> Reply {
    Response::from_data(body).with_header(header("Content-Type", "text/html; charset=utf-8"))
}
