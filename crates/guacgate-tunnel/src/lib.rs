// Tunnel core: backend sockets, per-direction locking, and the registry
// that transport adapters resolve tunnels through.

pub mod config;
pub mod connect;
pub mod error;
pub mod io;
pub mod mock;
pub mod registry;
pub mod socket;
pub mod tunnel;

pub use config::{ClientInfo, ConnectionConfig};
pub use connect::{establish_socket, GuacdConnector, TunnelConnector, PROTOCOL_VERSION};
pub use error::{GuacError, Result};
pub use io::{InstructionReader, InstructionWriter, MAX_INSTRUCTION_SIZE};
pub use registry::TunnelRegistry;
pub use socket::GuacamoleSocket;
pub use tunnel::{
    GuacamoleTunnel, TunnelReader, TunnelState, TunnelWriter, INTERNAL_DATA_OPCODE,
};
