//! Starting a session's server and reaching its port

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::session::error::SessionError;
use crate::session::folders::RootKey;

/// Pause between connection attempts while the server starts up
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Everything needed to bring up one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub root: RootKey,
    pub port: u16,
    pub command: String,
    /// Arguments with `${port}` already filled in
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// When false, only connect to a server that is already listening
    pub spawn: bool,
}

/// A live session: the server process (when spawned here) and the socket
/// connected to it.
#[derive(Debug)]
pub struct Connection {
    pub process: Option<Child>,
    pub socket: TcpStream,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Starts the server and connects to it. The caller bounds this with its
    /// own timeout and drops the attempt when it expires.
    async fn launch(&self, request: &LaunchRequest) -> Result<Connection, SessionError>;
}

/// [`Launcher`] that runs the server as a child process on the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    fn spawn(request: &LaunchRequest) -> Result<Child, SessionError> {
        info!(
            "Spawning server {} {} for {} (cwd: {:?})",
            request.command,
            request.args.join(" "),
            request.root,
            request.cwd
        );

        let mut command = Command::new(&request.command);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| SessionError::Spawn {
            command: request.command.clone(),
            root: request.root.to_string(),
            source,
        })?;

        let root = request.root.to_string();
        forward_output(child.stdout.take(), root.clone(), "stdout");
        forward_output(child.stderr.take(), root, "stderr");
        Ok(child)
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Connection, SessionError> {
        let mut process = if request.spawn {
            Some(Self::spawn(request)?)
        } else {
            None
        };

        loop {
            if let Some(Ok(Some(status))) = process.as_mut().map(Child::try_wait) {
                return Err(SessionError::ProcessExited {
                    root: request.root.to_string(),
                    status: status.to_string(),
                });
            }

            match TcpStream::connect(("127.0.0.1", request.port)).await {
                Ok(socket) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY: {}", e);
                    }
                    info!("Connected to port {} for {}", request.port, request.root);
                    return Ok(Connection { process, socket });
                }
                // A spawned server may not be listening yet
                Err(_) if process.is_some() => tokio::time::sleep(CONNECT_RETRY_INTERVAL).await,
                Err(source) => {
                    return Err(SessionError::Connect {
                        port: request.port,
                        source,
                    });
                }
            }
        }
    }
}

/// Copies a child's output stream into the log, line by line.
fn forward_output<R>(stream: Option<R>, root: String, name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!("[{}] {}: {}", root, name, line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read server {} for {}: {}", name, root, e);
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn request(port: u16, command: &str, args: &[&str], spawn: bool) -> LaunchRequest {
        LaunchRequest {
            root: RootKey::Untitled,
            port,
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
            spawn,
        }
    }

    #[tokio::test]
    async fn launch_connects_to_running_server_without_spawning() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connection = ProcessLauncher::new()
            .launch(&request(port, "unused", &[], false))
            .await
            .unwrap();

        assert!(connection.process.is_none());
        assert_eq!(connection.socket.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn launch_without_spawn_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ProcessLauncher::new()
            .launch(&request(port, "unused", &[], false))
            .await;

        assert!(matches!(result, Err(SessionError::Connect { .. })));
    }

    #[tokio::test]
    async fn launch_reports_missing_executable() {
        let result = ProcessLauncher::new()
            .launch(&request(1, "/definitely/not/a/server", &[], true))
            .await;

        assert!(matches!(result, Err(SessionError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_reports_server_that_exits_early() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ProcessLauncher::new()
            .launch(&request(port, "sh", &["-c", "exit 2"], true))
            .await;

        assert!(matches!(result, Err(SessionError::ProcessExited { .. })));
    }
}
