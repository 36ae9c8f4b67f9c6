//! Connection establishment: accept loop and outbound connect

pub mod connector;
pub mod listener;

pub use connector::{Connector, ConnectorConfig};
pub use listener::{AcceptHandler, Listener, ListenerConfig, ListenerState};
