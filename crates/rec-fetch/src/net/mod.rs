//! Track sessions over a message transport.

pub mod session;
pub mod transport;

pub use session::{ByteSource, Pulled, SessionParams, TrackSession};
pub use transport::{Connector, Transport, WsConnector};
