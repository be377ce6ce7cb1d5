//! Server configuration.

use std::time::Duration;

use ldapd_proto::codec::DEFAULT_MAX_MESSAGE_SIZE;

/// Tunables applied to every accepted connection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Per-message read deadline. `None` means wait forever; an idle
    /// connection then lives until the peer closes it or the server stops.
    pub read_timeout: Option<Duration>,

    /// Per-message write deadline, applied to each outbound flush.
    pub write_timeout: Option<Duration>,

    /// Upper bound on one inbound or outbound message. Validated before any
    /// buffer space is reserved.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
