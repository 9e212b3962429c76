use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to spawn {command} for {root}: {source}")]
    Spawn {
        command: String,
        root: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to port {port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Server for {root} exited before accepting a connection ({status})")]
    ProcessExited { root: String, status: String },

    #[error("No connection on port {port} within {timeout:?}")]
    Timeout { port: u16, timeout: Duration },
}
