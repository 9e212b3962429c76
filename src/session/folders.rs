use std::fmt;
use std::path::PathBuf;

use tower_lsp::lsp_types::Url;

/// Name of the pseudo-root shared by documents that have no file on disk.
pub const UNTITLED_ROOT: &str = "____untitled____";

/// Key of a session: a workspace folder URI or the untitled pseudo-root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootKey {
    Untitled,
    /// Folder URI, always ending with `/`
    Folder(String),
}

impl RootKey {
    pub fn folder(uri: &Url) -> Self {
        Self::Folder(with_trailing_slash(uri))
    }

    /// Local directory of a folder root.
    pub fn path(&self) -> Option<PathBuf> {
        match self {
            Self::Untitled => None,
            Self::Folder(uri) => Url::parse(uri).ok()?.to_file_path().ok(),
        }
    }
}

impl fmt::Display for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untitled => f.write_str(UNTITLED_ROOT),
            Self::Folder(uri) => f.write_str(uri),
        }
    }
}

/// Open workspace folders, shortest URI first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceFolders {
    folders: Vec<String>,
}

impl WorkspaceFolders {
    pub fn new<'a>(folders: impl IntoIterator<Item = &'a Url>) -> Self {
        let mut res = Self::default();
        for folder in folders {
            res.add(folder);
        }
        res
    }

    pub fn add(&mut self, folder: &Url) {
        let folder = with_trailing_slash(folder);
        if self.folders.contains(&folder) {
            return;
        }
        self.folders.push(folder);
        self.folders.sort_by_key(String::len);
    }

    /// Returns false when the folder was not open.
    pub fn remove(&mut self, folder: &Url) -> bool {
        let folder = with_trailing_slash(folder);
        let before = self.folders.len();
        self.folders.retain(|f| *f != folder);
        self.folders.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Session root of a document.
    ///
    /// Untitled documents share one root. A file belongs to the outermost
    /// open folder containing it; files outside every folder, and other
    /// schemes, get none.
    pub fn root_for(&self, document: &Url) -> Option<RootKey> {
        match document.scheme() {
            "untitled" => Some(RootKey::Untitled),
            "file" => self
                .folders
                .iter()
                .find(|folder| document.as_str().starts_with(folder.as_str()))
                .map(|folder| RootKey::Folder(folder.clone())),
            _ => None,
        }
    }
}

fn with_trailing_slash(uri: &Url) -> String {
    let mut res = uri.to_string();
    if !res.ends_with('/') {
        res.push('/');
    }
    res
}
