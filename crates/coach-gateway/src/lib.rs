pub mod connection;
pub mod error;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod store;

pub use registry::Registry;
pub use relay::{Connection, Relay};
pub use routes::router;
pub use store::{MessageStore, UserDirectory};
