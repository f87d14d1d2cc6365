//! Trigger intake.
//!
//! Messages arrive from the transport as loosely typed JSON. They are
//! validated once, here, into [`PassEvent`](crate::pass::PassEvent)s and then
//! handed to the [`PassTracker`](crate::pass::PassTracker).

mod config;
#[allow(clippy::module_inception)]
mod listener;
mod normalize;
mod types;

pub use config::ListenerConfig;
pub use listener::TriggerListener;
pub use normalize::normalize;
pub use types::{MessageKind, RawMessage, TriggerError};
