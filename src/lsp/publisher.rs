//! Diagnostic publishing with cross-file retraction
//!
//! Compiling one document can report problems in the files it depends on.
//! Those files never get a close event of their own, so their diagnostics are
//! owned by the document whose validation produced them.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tower_lsp::Client;
use tower_lsp::lsp_types::{Diagnostic, Url};
use tracing::debug;

use crate::compiler::DiagnosticMap;

/// Destination for published diagnostics.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    /// Replaces the diagnostics shown for `uri`; an empty list clears them.
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>);
}

#[async_trait]
impl DiagnosticSink for Client {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        self.publish_diagnostics(uri, diagnostics, None).await;
    }
}

/// Tracks which files received diagnostics from each document's last
/// validation pass.
#[derive(Debug, Default)]
pub struct DiagnosticPublisher {
    dependencies: Mutex<HashMap<Url, Vec<Url>>>,
}

impl DiagnosticPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes one validation pass of `document` and clears files that
    /// had diagnostics on the previous pass but not on this one.
    pub async fn publish(
        &self,
        sink: &dyn DiagnosticSink,
        document: &Url,
        diagnostics: DiagnosticMap,
    ) {
        let files: Vec<Url> = diagnostics.keys().cloned().collect();
        let previous = self
            .dependencies
            .lock()
            .unwrap()
            .insert(document.clone(), files)
            .unwrap_or_default();

        let stale: Vec<Url> = previous
            .into_iter()
            .filter(|file| !diagnostics.contains_key(file))
            .collect();

        for (file, file_diagnostics) in diagnostics {
            debug!("Publishing {} diagnostics for {}", file_diagnostics.len(), file);
            sink.publish(file, file_diagnostics).await;
        }
        for file in stale {
            debug!("Retracting diagnostics for {}", file);
            sink.publish(file, Vec::new()).await;
        }
    }

    /// Clears everything `document` published, including its own diagnostics.
    pub async fn close(&self, sink: &dyn DiagnosticSink, document: &Url) {
        let dependencies = self
            .dependencies
            .lock()
            .unwrap()
            .remove(document)
            .unwrap_or_default();

        sink.publish(document.clone(), Vec::new()).await;
        for file in dependencies.into_iter().filter(|file| file != document) {
            sink.publish(file, Vec::new()).await;
        }
    }

    /// Files that received diagnostics from `document`'s last pass.
    pub fn dependencies(&self, document: &Url) -> Vec<Url> {
        self.dependencies
            .lock()
            .unwrap()
            .get(document)
            .cloned()
            .unwrap_or_default()
    }
}
