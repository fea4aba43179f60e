pub mod conference;
pub mod error;
pub mod floor;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod transport;
pub mod user;
pub mod watchdog;

pub use conference::{ChairPolicy, Conference, ConferenceConfig, Outgoing, QueueSnapshot, Rejection};
pub use error::{BfcpError, Result};
pub use protocol::{Arguments, Direction, Entity, build_message, parse_message};
pub use server::{IpRestriction, MessageCallback, Server, ServerConfig};
pub use transport::{Endpoint, MessageSink, TransportKind};
