//! Remote-console access.
//!
//! * [`transport`] - the opaque request/response seam and the RCON-backed
//!   implementation
//! * [`client`] - per-command client, error sentinel and plugin helpers
//! * [`roster`] - parsing of the roster-listing response

pub mod client;
pub mod roster;
pub mod transport;

pub use client::{
    is_error_response, response_indicates_success, RemoteConsoleClient, DEFAULT_COMMAND_TIMEOUT, ERROR_SENTINEL,
};
pub use roster::parse_roster;
pub use transport::{ConsoleTransport, RconTransport};
