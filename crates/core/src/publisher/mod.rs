//! Result publishing.
//!
//! After a stage succeeds, [`ResultPublisher`] builds one
//! [`ProductNotification`] per artifact and hands it to a [`Publisher`] sink.
//! Delivery is at-least-once: a crash between publish and pass completion can
//! repeat notifications, and downstream consumers are expected to be idempotent.

mod broadcast;
mod config;
mod result_publisher;
mod traits;
mod types;

pub use broadcast::BroadcastPublisher;
pub use config::PublisherConfig;
pub use result_publisher::ResultPublisher;
pub use traits::{PublishError, Publisher};
pub use types::ProductNotification;
