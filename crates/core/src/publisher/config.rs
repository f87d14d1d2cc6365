//! Configuration for the result publisher.

use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::locator::TemplateError;

/// Placeholders a topic template may use.
pub const TOPIC_PLACEHOLDERS: [&str; 5] = ["format", "product", "station", "platform", "stage"];

static TOPIC_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]*)\}").expect("topic placeholder pattern is valid"));

/// Configuration for outbound product notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Receiving station name, used in topics and payloads.
    #[serde(default = "default_station")]
    pub station: String,

    /// Topic template. Supports `{format}`, `{product}`, `{station}`,
    /// `{platform}` and `{stage}`.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Buffer of the in-process broadcast channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_station() -> String {
    "unknown".to_string()
}

fn default_topic() -> String {
    "/{format}/{product}/{station}/polar/direct_readout".to_string()
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            station: default_station(),
            topic: default_topic(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PublisherConfig {
    pub fn with_station(mut self, station: impl Into<String>) -> Self {
        self.station = station.into();
        self
    }

    /// Rejects unknown placeholders and stray braces in `topic`.
    pub fn check_topic(&self) -> Result<(), TemplateError> {
        for caps in TOPIC_PLACEHOLDER.captures_iter(&self.topic) {
            let name = &caps[1];
            if !TOPIC_PLACEHOLDERS.contains(&name) {
                return Err(TemplateError::UnknownPlaceholder {
                    name: name.to_string(),
                });
            }
        }
        let rest = TOPIC_PLACEHOLDER.replace_all(&self.topic, "");
        if rest.contains(['{', '}']) {
            return Err(TemplateError::Syntax {
                template: self.topic.clone(),
                reason: "unbalanced braces".to_string(),
            });
        }
        Ok(())
    }

    /// Fills the topic template from `(placeholder, value)` pairs.
    ///
    /// Placeholders without a value are kept verbatim.
    pub fn render_topic(&self, values: &[(&str, &str)]) -> String {
        TOPIC_PLACEHOLDER
            .replace_all(&self.topic, |caps: &Captures<'_>| {
                values
                    .iter()
                    .find(|(name, _)| *name == &caps[1])
                    .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
            })
            .into_owned()
    }
}
