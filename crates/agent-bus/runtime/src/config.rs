//! Bus configuration

use serde::{Deserialize, Serialize};

/// Runtime settings of an [`AgentBus`](crate::AgentBus)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Frames buffered per in-memory connection before it lags
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Applied to outgoing messages whose `ttl_seconds` is 0
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,

    /// Wait used by `request()` when neither the call nor the Request sets one
    #[serde(default = "default_response_timeout_seconds")]
    pub default_response_timeout_seconds: u64,

    /// Write sent/delivered records to the persistence sink
    #[serde(default = "default_log_messages")]
    pub log_messages: bool,
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_ttl_seconds() -> u64 {
    agent_bus_types::DEFAULT_TTL_SECONDS
}

fn default_response_timeout_seconds() -> u64 {
    agent_bus_types::DEFAULT_RESPONSE_TIMEOUT_SECONDS
}

fn default_log_messages() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            default_ttl_seconds: default_ttl_seconds(),
            default_response_timeout_seconds: default_response_timeout_seconds(),
            log_messages: default_log_messages(),
        }
    }
}
