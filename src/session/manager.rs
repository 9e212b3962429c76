//! One server session per workspace root
//!
//! A session is a server process and the socket connected to it, torn down
//! together. The map entry is the session's only owner: removing it, the
//! process exiting or either end of the stream closing all run the same
//! teardown, which kills the process and forgets the entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::oneshot;
use tower_lsp::lsp_types::Url;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::session::error::SessionError;
use crate::session::folders::{RootKey, WorkspaceFolders};
use crate::session::launcher::{Connection, LaunchRequest, Launcher};

const PORT_PLACEHOLDER: &str = "${port}";

/// Buffer size of the in-memory stream handed to the session's client
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Spawning,
    Connected,
}

/// A session created by [`SessionManager::open_document`].
#[derive(Debug)]
pub struct OpenedSession {
    pub root: RootKey,
    pub port: u16,
    /// Byte stream to the session's server; dropping it ends the session
    pub stream: DuplexStream,
}

#[derive(Debug)]
struct Entry {
    id: u64,
    state: SessionState,
    /// Dropped together with the entry, which wakes the session task
    _closer: Option<oneshot::Sender<()>>,
}

type SessionMap = Arc<Mutex<HashMap<RootKey, Entry>>>;

pub struct SessionManager {
    config: SessionConfig,
    launcher: Arc<dyn Launcher>,
    folders: Mutex<WorkspaceFolders>,
    sessions: SessionMap,
    next_id: AtomicU64,
    folder_sessions: AtomicU32,
}

impl SessionManager {
    pub fn new(config: SessionConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            folders: Mutex::new(WorkspaceFolders::default()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            folder_sessions: AtomicU32::new(0),
        }
    }

    pub fn set_workspace_folders<'a>(&self, folders: impl IntoIterator<Item = &'a Url>) {
        *self.folders.lock().unwrap() = WorkspaceFolders::new(folders);
    }

    pub fn add_folder(&self, folder: &Url) {
        self.folders.lock().unwrap().add(folder);
    }

    /// Forgets the folder and tears down its session, if any.
    pub fn remove_folder(&self, folder: &Url) {
        self.folders.lock().unwrap().remove(folder);
        let root = RootKey::folder(folder);
        if self.sessions.lock().unwrap().remove(&root).is_some() {
            info!("Closing session for removed folder {}", root);
        }
    }

    pub fn state(&self, root: &RootKey) -> Option<SessionState> {
        self.sessions.lock().unwrap().get(root).map(|e| e.state)
    }

    /// Tears down every session.
    pub fn shutdown_all(&self) {
        let closed: Vec<RootKey> = self.sessions.lock().unwrap().drain().map(|(k, _)| k).collect();
        for root in closed {
            info!("Closing session for {}", root);
        }
    }

    /// Makes sure the root containing `document` has a session.
    ///
    /// Returns the new session when this call created it. Returns `None` when
    /// the document has no root, a session already exists or is starting,
    /// or the server could not be reached in time.
    pub async fn open_document(&self, document: &Url) -> Option<OpenedSession> {
        let Some(root) = self.folders.lock().unwrap().root_for(document) else {
            debug!("No session root for {}", document);
            return None;
        };

        let (id, port) = {
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&root) {
                return None;
            }
            let Some(port) = self.port_for(&root) else {
                warn!("No port left for {}", root);
                return None;
            };
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            sessions.insert(
                root.clone(),
                Entry {
                    id,
                    state: SessionState::Spawning,
                    _closer: None,
                },
            );
            (id, port)
        };

        let request = self.launch_request(&root, port);
        let connection = match tokio::time::timeout(
            self.config.connect_timeout,
            self.launcher.launch(&request),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                warn!("{}", e);
                remove_entry(&self.sessions, &root, id);
                return None;
            }
            Err(_) => {
                let e = SessionError::Timeout {
                    port,
                    timeout: self.config.connect_timeout,
                };
                warn!("{}", e);
                remove_entry(&self.sessions, &root, id);
                return None;
            }
        };

        let (stream, inner) = tokio::io::duplex(STREAM_BUFFER_SIZE);
        let (closer, closed) = oneshot::channel();
        {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get_mut(&root) {
                Some(entry) if entry.id == id => {
                    entry.state = SessionState::Connected;
                    entry._closer = Some(closer);
                }
                _ => {
                    info!("Session for {} was closed while starting", root);
                    return None;
                }
            }
        }

        tokio::spawn(supervise(
            self.sessions.clone(),
            root.clone(),
            id,
            connection,
            inner,
            closed,
        ));
        Some(OpenedSession { root, port, stream })
    }

    /// The untitled session uses the base port; folder sessions count up
    /// from the port after it.
    fn port_for(&self, root: &RootKey) -> Option<u16> {
        let offset = match root {
            RootKey::Untitled => 0,
            RootKey::Folder(_) => self.folder_sessions.fetch_add(1, Ordering::Relaxed) + 1,
        };
        u16::try_from(u32::from(self.config.base_port) + offset).ok()
    }

    fn launch_request(&self, root: &RootKey, port: u16) -> LaunchRequest {
        let port_arg = port.to_string();
        LaunchRequest {
            root: root.clone(),
            port,
            command: self.config.command.clone(),
            args: self
                .config
                .args
                .iter()
                .map(|arg| arg.replace(PORT_PLACEHOLDER, &port_arg))
                .collect(),
            cwd: root.path().or_else(|| self.config.cwd.clone()),
            spawn: self.config.spawn,
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

fn remove_entry(sessions: &SessionMap, root: &RootKey, id: u64) {
    let mut sessions = sessions.lock().unwrap();
    if sessions.get(root).is_some_and(|e| e.id == id) {
        sessions.remove(root);
    }
}

async fn supervise(
    sessions: SessionMap,
    root: RootKey,
    id: u64,
    connection: Connection,
    stream: DuplexStream,
    closed: oneshot::Receiver<()>,
) {
    let Connection {
        mut process,
        socket,
    } = connection;

    let reason = pump(&mut process, socket, stream, closed).await;

    if let Some(child) = process.as_mut() {
        stop(child, &root).await;
    }
    remove_entry(&sessions, &root, id);
    info!("Session for {} ended: {}", root, reason);
}

/// Relays bytes until one side goes away, then reports which one did.
async fn pump(
    process: &mut Option<Child>,
    mut socket: TcpStream,
    stream: DuplexStream,
    closed: oneshot::Receiver<()>,
) -> String {
    let (mut socket_read, mut socket_write) = socket.split();
    let (mut stream_read, mut stream_write) = tokio::io::split(stream);

    let exited = async {
        match process.as_mut() {
            Some(child) => child.wait().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        status = exited => match status {
            Ok(status) => format!("server exited with {}", status),
            Err(e) => format!("failed to wait for server: {}", e),
        },
        result = relay(&mut socket_read, &mut stream_write) => match result {
            Ok(()) => "server closed the connection".to_string(),
            Err(e) => format!("socket error: {}", e),
        },
        result = relay(&mut stream_read, &mut socket_write) => match result {
            Ok(()) => "client closed the stream".to_string(),
            Err(e) => format!("stream error: {}", e),
        },
        _ = closed => "closed".to_string(),
    }
}

async fn relay<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    tokio::io::copy(reader, writer).await.map(|_| ())
}

async fn stop(child: &mut Child, root: &RootKey) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill server for {}: {}", root, e);
    }
}
