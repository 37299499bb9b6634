//! HTTP/WebSocket surface: the Client Gateway plus the ambient rate
//! limiting it applies to inbound traffic.

pub mod gateway;
pub mod messages;
pub mod rate_limit;
pub mod state;

pub use gateway::router;
pub use state::AppState;
