use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Configuration section requested from the client.
pub const SETTINGS_SECTION: &str = "dascript";

/// Default cap on captured compiler output (1 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long a new session may take to spawn its server and connect to it
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Lowest base port handed out when no debug port is configured
const FALLBACK_PORT_START: u16 = 7999;
const FALLBACK_PORT_SPAN: u32 = 3000;

/// Per-document settings, as sent by the client under the `dascript` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Compiler executable (name on PATH or absolute path)
    pub compiler: String,
    /// Argument template for validation runs
    pub compiler_args: Vec<String>,
    /// Argument template for cursor queries (hover, definition)
    pub cursor_args: Vec<String>,
    /// Extra roots used to resolve relative paths reported by the compiler
    pub project_roots: Vec<PathBuf>,
    pub verbose_hover: bool,
    /// Captured stdout beyond this size is dropped
    pub max_output_bytes: usize,
    /// Source files compiled to obtain the global completion list.
    /// Relative entries are resolved against the server executable's directory.
    pub completion_files: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            compiler: "dasAot".to_string(),
            compiler_args: vec!["${file}".into(), "dummy.cpp".into(), "-j".into()],
            cursor_args: vec![
                "${file}".into(),
                "dummy.cpp".into(),
                "-j".into(),
                "-cursor".into(),
                "${character}".into(),
                "${line}".into(),
            ],
            project_roots: Vec::new(),
            verbose_hover: false,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            completion_files: vec!["items.das".into(), "items2.das".into()],
        }
    }
}

impl Settings {
    /// Decodes settings from a client payload, falling back to defaults.
    pub fn from_value(value: serde_json::Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!("Invalid {} settings, using defaults: {}", SETTINGS_SECTION, e);
            Self::default()
        })
    }

    /// Completion source files as absolute paths.
    pub fn completion_paths(&self) -> Vec<PathBuf> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        self.completion_files
            .iter()
            .map(|file| exe_dir.join(file))
            .collect()
    }
}

/// How workspace sessions start their server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Server executable
    pub command: String,
    /// Argument template; `${port}` is replaced with the session's port
    pub args: Vec<String>,
    /// Working directory for the untitled session
    pub cwd: Option<PathBuf>,
    /// Port of the untitled session; folder sessions count up from here
    pub base_port: u16,
    /// When false, sessions connect to an already-running server
    pub spawn: bool,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: None,
            base_port: fallback_base_port(std::process::id()),
            spawn: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Applies the editor's debug port setting.
    ///
    /// A positive port spawns servers starting at that port, a negative one
    /// connects to a server already listening on `|port|`, zero keeps the
    /// defaults.
    pub fn with_debug_port(mut self, port: i32) -> Self {
        if port != 0 {
            self.spawn = port > 0;
            self.base_port = u16::try_from(port.unsigned_abs()).unwrap_or(u16::MAX);
        }
        self
    }

    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Spreads editor instances over `7999..11000` so concurrent editors do not
/// fight over the same ports.
fn fallback_base_port(seed: u32) -> u16 {
    FALLBACK_PORT_START + (seed % FALLBACK_PORT_SPAN) as u16
}

/// Returns the path to the data directory for das-lsp.
/// Uses $XDG_DATA_HOME/das-lsp if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/das-lsp,
/// or ./das-lsp if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("das-lsp.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("das-lsp")
}
