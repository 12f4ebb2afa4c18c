//! WebSocket layer: connection lifecycle, channels and event delivery.
//!
//! The endpoint at `/ws` accepts clients, authenticates them, lets them
//! join channels and pushes dispatched bus events to them.

pub mod bridge;
pub mod connection;
pub mod handler;
pub mod manager;
pub mod messages;
pub mod registry;

pub use bridge::ConnectionBridge;
pub use manager::{ConnectionManager, ConnectionSettings, SweepReport};
pub use messages::{MessageType, WsMessage};
pub use registry::{ConnectionInfo, ConnectionRegistry, ConnectionState, Outbound, RegistryStats};
