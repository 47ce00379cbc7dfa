/* \page ServerOverview Server Overview
WireGuard VPN gateway control plane.

- Configuration loading and server key management (`config.rs`).
- Error taxonomy (`error.rs`).
- Address allocation over the client subnet (`ip_pool.rs`).
- Client and user directory (`store.rs`).
- Split-credential authentication (`auth.rs`).
- Tunnel device seam (`device.rs`).
- Device/directory reconciliation (`reconciler.rs`).
- Administrative HTTP API (`http_api.rs`).
- Runtime orchestration (`runtime.rs`).
*/
pub mod auth;
pub mod config;
pub mod device;
pub mod error;
pub mod http_api;
pub mod ip_pool;
pub mod reconciler;
pub mod runtime;
pub mod store;
