//! Remote-console transports.
//!
//! The wire protocol is not implemented here. [`ConsoleTransport`] is the
//! seam: one call is one connection carrying one command, and the production
//! implementation hands the exchange to the `rcon` crate.

use async_trait::async_trait;
use rcon::Connection;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::RemoteConsoleConfig;
use crate::error::{TransportError, TransportResult};

/// Opens a connection, sends `command`, returns the raw response.
#[async_trait]
pub trait ConsoleTransport: Send + Sync + 'static {
    async fn execute(&self, config: &RemoteConsoleConfig, command: &str) -> TransportResult<String>;
}

/// Source-style RCON transport backed by the `rcon` crate, with the
/// fragmentation workarounds Minecraft servers need.
#[derive(Debug, Clone, Copy, Default)]
pub struct RconTransport;

impl RconTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConsoleTransport for RconTransport {
    async fn execute(&self, config: &RemoteConsoleConfig, command: &str) -> TransportResult<String> {
        let address = config.address();
        debug!("RCON {} <- {}", address, command);

        let mut connection = <Connection<TcpStream>>::builder()
            .enable_minecraft_quirks(true)
            .connect(address.as_str(), &config.password)
            .await
            .map_err(|e| match e {
                rcon::Error::Auth => TransportError::Auth,
                other => TransportError::Connect(address.clone(), other.to_string()),
            })?;

        // The connection is dropped, and the socket closed, on return.
        connection
            .cmd(command)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}
