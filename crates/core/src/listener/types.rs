//! Inbound message types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A loosely typed message as it arrives from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub topic: String,
    /// `file`, `dataset` or `collection`.
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            kind: kind.into(),
            data,
        }
    }
}

/// Message shapes that can announce raw files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// One file in `data.uri`.
    File,
    /// Several files in `data.dataset[].uri`.
    Dataset,
    /// Several entries in `data.collection[]`, each a file or a dataset.
    Collection,
}

impl MessageKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "file" => Some(Self::File),
            "dataset" => Some(Self::Dataset),
            "collection" => Some(Self::Collection),
            _ => None,
        }
    }
}

/// Why a message was rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TriggerError {
    #[error("unsupported message type '{0}'")]
    UnsupportedKind(String),

    #[error("topic '{0}' is not subscribed")]
    TopicNotSubscribed(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("not an EOS MODIS platform: {0}")]
    UnsupportedPlatform(String),

    #[error("unsupported sensor(s): {0:?}")]
    UnsupportedSensor(Vec<String>),

    #[error("file is on remote host '{0}'")]
    RemoteFile(String),
}

impl TriggerError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedKind(_) => "unsupported_kind",
            Self::TopicNotSubscribed(_) => "topic",
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::UnsupportedPlatform(_) => "platform",
            Self::UnsupportedSensor(_) => "sensor",
            Self::RemoteFile(_) => "remote_file",
        }
    }
}
