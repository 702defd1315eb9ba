//! Client side of the coaching chat: one long-lived [`SessionManager`] per app
//! session, wrapping a reconnecting socket to the relay.

pub mod config;
pub mod listeners;
pub mod session;
pub mod state;
pub mod transport;

pub use config::SessionConfig;
pub use listeners::{Listeners, Subscription};
pub use session::{MediaPayload, RECONNECT_EXHAUSTED, SessionManager};
pub use state::{ConnectionState, ConnectionStatus};
pub use transport::{Connector, Frame, Transport, TransportEvent, WsConnector};
