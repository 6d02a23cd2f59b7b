use std::time::Duration;

/// Client timeouts.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Websocket handshake timeout.
    pub connect_timeout: Duration,
    /// How long a single request may wait for its response.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}
