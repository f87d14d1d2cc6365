//! Outbound notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pass::{PassId, Platform};

/// Announcement that one product file is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductNotification {
    pub id: Uuid,
    pub topic: String,
    pub pass_id: PassId,
    pub platform: Platform,
    pub platform_name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit_number: Option<u32>,
    /// Product-type tag of the producing stage (e.g. "1A", "1B").
    pub product: String,
    /// `file://` URI of the artifact.
    pub uri: String,
    /// Artifact base name.
    pub uid: String,
    pub stage: String,
    pub station: String,
    pub sensor: String,
    pub format: String,
    pub data_type: String,
    pub published_at: DateTime<Utc>,
}
