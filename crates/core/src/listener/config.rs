//! Trigger listener configuration.

use serde::{Deserialize, Serialize};

/// Configuration for inbound trigger messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Topic prefixes to accept. Empty accepts every topic.
    #[serde(default)]
    pub subscribe_topics: Vec<String>,

    /// Sensors a message may announce.
    #[serde(default = "default_sensors")]
    pub accepted_sensors: Vec<String>,

    /// URI hosts considered local. An empty host always is.
    #[serde(default = "default_local_hosts")]
    pub local_hosts: Vec<String>,

    /// Reject messages without an orbit number.
    #[serde(default)]
    pub require_orbit: bool,

    /// Buffer of the intake channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_sensors() -> Vec<String> {
    vec!["modis".to_string(), "gbad".to_string()]
}

fn default_local_hosts() -> Vec<String> {
    vec!["localhost".to_string()]
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            subscribe_topics: Vec::new(),
            accepted_sensors: default_sensors(),
            local_hosts: default_local_hosts(),
            require_orbit: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl ListenerConfig {
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.subscribe_topics = topics;
        self
    }

    pub fn accepts_topic(&self, topic: &str) -> bool {
        self.subscribe_topics.is_empty() || self.subscribe_topics.iter().any(|t| topic.starts_with(t.as_str()))
    }
}
