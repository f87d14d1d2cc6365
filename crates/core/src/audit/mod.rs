//! Audit trail.
//!
//! Every pass lifecycle transition is recorded as an [`AuditEvent`]. Components
//! emit through a cloneable [`AuditHandle`]; a single [`AuditWriter`] task
//! persists the events to an [`AuditStore`] (SQLite in production).

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::*;
pub use handle::*;
pub use sqlite::*;
pub use store::*;
pub use writer::*;
