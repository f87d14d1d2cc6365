pub mod audit;
pub mod handlers;
pub mod middleware;
pub mod orchestrator;
pub mod passes;
pub mod routes;
pub mod triggers;
pub mod ws;

pub use routes::create_router;
pub use ws::{spawn_forwarder, WsBroadcaster, WsMessage};
