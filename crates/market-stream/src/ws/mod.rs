/*
[INPUT]:  Connector, connection settings, subscription payload
[OUTPUT]: RFC 6455 framing, handshake, and a self-healing Connection
[POS]:    WebSocket layer - protocol engine without a WebSocket library
[UPDATE]: When adding protocol features or changing connection logic
*/

pub mod backoff;
pub mod connection;
pub mod frame;
pub mod handshake;
pub mod transport;

pub use backoff::Backoff;
pub use connection::{Connection, ConnectionState, RawMessage};
pub use frame::{Frame, FrameError, Opcode, Role};
pub use handshake::{ClientHandshake, HandshakeError, compute_accept_key};
pub use transport::{Connector, TcpConnector, TlsConnector};
