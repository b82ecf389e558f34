//! # studyhall-server — HTTP surface and process bootstrap
//!
//! ```text
//!   HTTP (axum)                       WebSocket
//!  /groups/…  ──▶ routes ──┐        /groups/{id}/ws ──▶ Gateway
//!                          ▼                               │
//!                    GroupService ◀──── Messenger ◀────────┘
//!                          │               │
//!                     GroupStore        RoomHub (memory | redis)
//! ```
//!
//! - [`config`] — defaults plus `STUDYHALL_*` environment overrides
//! - [`routes`] — the request/response API
//! - [`extract`] — bearer-token caller extraction
//! - [`error`] — error taxonomy to HTTP status mapping

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use studyhall_collab::{BrokerError, Messenger, RoomHub};
use studyhall_groups::GroupService;

pub use config::{ConfigError, ServerConfig};
pub use error::{ApiError, ApiResult};
pub use extract::Caller;
pub use routes::router;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    messenger: Arc<Messenger>,
}

impl AppState {
    pub fn new(messenger: Arc<Messenger>) -> Self {
        Self { messenger }
    }

    pub fn groups(&self) -> &Arc<GroupService> {
        self.messenger.groups()
    }

    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }
}

/// Room hub for this deployment: Redis when configured and compiled in,
/// otherwise in-process.
pub async fn build_hub(config: &ServerConfig) -> Result<RoomHub, BrokerError> {
    let capacity = config.gateway.broadcast_capacity;
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => RoomHub::redis(url, capacity).await,
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            log::warn!(
                "{} is set but this build has no redis support; rooms stay in-process",
                config::ENV_REDIS_URL
            );
            Ok(RoomHub::in_memory(capacity))
        }
        None => Ok(RoomHub::in_memory(capacity)),
    }
}
