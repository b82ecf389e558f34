//! Gateway configuration.

/// Connection gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room (events buffered per connection)
    pub broadcast_capacity: usize,
    /// Seconds between server pings
    pub heartbeat_interval_secs: u64,
    /// Seconds without inbound traffic before a connection is dropped
    pub idle_timeout_secs: u64,
    /// Largest accepted inbound text frame, in bytes
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 90,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Ephemeral port, short timers.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            broadcast_capacity: 64,
            heartbeat_interval_secs: 1,
            idle_timeout_secs: 2,
            max_frame_bytes: 16 * 1024,
        }
    }
}
