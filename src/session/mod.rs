//! Per-workspace server sessions
//! - folders.rs: maps documents to the outermost enclosing workspace folder
//! - launcher.rs: spawns a server process and connects to its port
//! - manager.rs: owns one session per root and tears it down as a unit
//! - error.rs: session errors

pub mod error;
pub mod folders;
pub mod launcher;
pub mod manager;

pub use error::SessionError;
pub use folders::{RootKey, WorkspaceFolders};
pub use launcher::{Connection, LaunchRequest, Launcher, ProcessLauncher};
pub use manager::{OpenedSession, SessionManager, SessionState};
