//! Adapter Byte-Stream Transport
//!
//! Owns the physical duplex connection to an adapter. A background reader
//! frames the incoming bytes into response lines and prompt tokens; callers
//! issue commands through a single locked drain/write/read exchange.

mod framer;
mod link;
mod simulator;
mod transport;

pub use framer::{Frame, LineFramer};
pub use link::{ByteStream, LinkTarget};
pub use simulator::{CommandLog, Reply, SimulatedAdapter};
pub use transport::AdapterTransport;
