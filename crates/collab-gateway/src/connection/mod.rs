//! WebSocket connection management

mod close;
#[allow(clippy::module_inception)]
mod connection;
mod manager;

pub use close::CloseCode;
pub use connection::{Connection, Closer, OUTBOUND_BUFFER, SEND_GRACE};
pub use manager::ConnectionManager;
