use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde_json::Value;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, warn};

use crate::compiler::normalize::uri_to_file;
use crate::compiler::{
    CursorData, Invocation, PathResolver, ProcessRunner, RawCursorOutput, Runner,
    collect_diagnostics, parse_json,
};
use crate::config::{SETTINGS_SECTION, Settings};
use crate::lsp::completion::{CompletionCache, parse_items};
use crate::lsp::hover;
use crate::lsp::publisher::DiagnosticPublisher;

pub struct Backend {
    client: Client,
    runner: Arc<dyn Runner>,
    has_configuration: AtomicBool,
    has_related_information: AtomicBool,
    workspace_folders: Mutex<Vec<PathBuf>>,
    global_settings: Mutex<Settings>,
    document_settings: Mutex<HashMap<Url, Settings>>,
    documents: Mutex<HashMap<Url, String>>,
    publisher: DiagnosticPublisher,
    completion: CompletionCache,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self::build(client, Arc::new(ProcessRunner::new()))
    }

    pub fn build(client: Client, runner: Arc<dyn Runner>) -> Self {
        Self {
            client,
            runner,
            has_configuration: AtomicBool::new(false),
            has_related_information: AtomicBool::new(false),
            workspace_folders: Mutex::new(Vec::new()),
            global_settings: Mutex::new(Settings::default()),
            document_settings: Mutex::new(HashMap::new()),
            documents: Mutex::new(HashMap::new()),
            publisher: DiagnosticPublisher::new(),
            completion: CompletionCache::new(),
        }
    }

    pub fn server_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                    ..Default::default()
                },
            )),
            completion_provider: Some(CompletionOptions {
                resolve_provider: Some(true),
                ..Default::default()
            }),
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            definition_provider: Some(OneOf::Left(true)),
            signature_help_provider: Some(SignatureHelpOptions {
                trigger_characters: Some(vec!["(".to_string(), ":".to_string()]),
                retrigger_characters: None,
                work_done_progress_options: WorkDoneProgressOptions::default(),
            }),
            workspace: Some(WorkspaceServerCapabilities {
                workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                    supported: Some(true),
                    change_notifications: Some(OneOf::Left(true)),
                }),
                file_operations: None,
            }),
            ..Default::default()
        }
    }

    /// Settings for `uri`: per document when the client answers
    /// `workspace/configuration`, the global ones otherwise.
    async fn settings_for(&self, uri: &Url) -> Settings {
        if !self.has_configuration.load(Ordering::Relaxed) {
            return self.global_settings.lock().unwrap().clone();
        }
        if let Some(settings) = self.document_settings.lock().unwrap().get(uri) {
            return settings.clone();
        }

        let item = ConfigurationItem {
            scope_uri: Some(uri.clone()),
            section: Some(SETTINGS_SECTION.to_string()),
        };
        let settings = match self.client.configuration(vec![item]).await {
            Ok(values) => Settings::from_value(values.into_iter().next().unwrap_or(Value::Null)),
            Err(e) => {
                warn!("Failed to fetch settings for {}: {}", uri, e);
                Settings::default()
            }
        };
        self.document_settings
            .lock()
            .unwrap()
            .insert(uri.clone(), settings.clone());
        settings
    }

    fn resolver(&self, settings: &Settings) -> PathResolver {
        PathResolver::new(
            &settings.project_roots,
            &self.workspace_folders.lock().unwrap(),
        )
    }

    async fn run(&self, invocation: &Invocation) -> String {
        self.client
            .log_message(MessageType::LOG, format!("> {}", invocation))
            .await;
        self.runner.run(invocation).await
    }

    /// Compiles the document and publishes whatever it reports.
    async fn validate(&self, uri: &Url) {
        let settings = self.settings_for(uri).await;
        let path = uri_to_file(uri.as_str());
        let invocation = Invocation::new(&settings.compiler, &settings.compiler_args, &path)
            .with_max_output(settings.max_output_bytes);

        let output = self.run(&invocation).await;
        let diagnostics = collect_diagnostics(
            &output,
            &path,
            &self.resolver(&settings),
            self.has_related_information.load(Ordering::Relaxed),
        );
        info!(
            "Validated {}: diagnostics for {} files",
            uri,
            diagnostics.len()
        );

        self.publisher
            .publish(&self.client, uri, diagnostics)
            .await;
    }

    /// Rebuilds the global completion list from the completion source files.
    async fn refresh_completion(&self, uri: &Url) {
        let settings = self.settings_for(uri).await;
        let runs = settings.completion_paths().into_iter().map(|file| {
            let invocation = Invocation::new(
                &settings.compiler,
                &settings.compiler_args,
                &file.to_string_lossy(),
            )
            .with_max_output(settings.max_output_bytes);
            async move { self.run(&invocation).await }
        });

        for output in join_all(runs).await {
            if let Some(items) = parse_items(&output) {
                info!("Got {} completion items", items.len());
                self.completion.replace(items);
            }
        }
    }

    async fn cursor_data(&self, uri: &Url, position: Position) -> (Settings, Option<CursorData>) {
        let settings = self.settings_for(uri).await;
        let path = uri_to_file(uri.as_str());
        let invocation = Invocation::new(&settings.compiler, &settings.cursor_args, &path)
            .at_position(position.line + 1, position.character)
            .with_max_output(settings.max_output_bytes);

        let output = self.run(&invocation).await;
        if output.trim().is_empty() {
            return (settings, None);
        }
        let data = parse_json::<RawCursorOutput>(&output)
            .inspect_err(|e| warn!("Failed to decode cursor output for {}: {}", uri, e))
            .ok()
            .map(|raw| CursorData::from_raw(raw, &self.resolver(&settings)));
        (settings, data)
    }

    async fn revalidate_open_documents(&self) {
        let uris: Vec<Url> = self.documents.lock().unwrap().keys().cloned().collect();
        for uri in uris {
            self.validate(&uri).await;
        }
    }
}

fn folder_path(folder: &WorkspaceFolder) -> Option<PathBuf> {
    folder
        .uri
        .to_file_path()
        .inspect_err(|_| debug!("Ignoring non-file workspace folder {}", folder.uri))
        .ok()
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let capabilities = &params.capabilities;
        let has_configuration = capabilities
            .workspace
            .as_ref()
            .and_then(|w| w.configuration)
            .unwrap_or(false);
        let has_related_information = capabilities
            .text_document
            .as_ref()
            .and_then(|t| t.publish_diagnostics.as_ref())
            .and_then(|p| p.related_information)
            .unwrap_or(false);
        self.has_configuration
            .store(has_configuration, Ordering::Relaxed);
        self.has_related_information
            .store(has_related_information, Ordering::Relaxed);

        let folders: Vec<PathBuf> = params
            .workspace_folders
            .iter()
            .flatten()
            .filter_map(folder_path)
            .collect();
        info!(
            "Initializing with {} workspace folders (configuration: {}, related information: {})",
            folders.len(),
            has_configuration,
            has_related_information
        );
        *self.workspace_folders.lock().unwrap() = folders;

        Ok(InitializeResult {
            capabilities: Self::server_capabilities(),
            server_info: Some(ServerInfo {
                name: "das-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "das-lsp initialized")
            .await;

        if !self.has_configuration.load(Ordering::Relaxed) {
            return;
        }
        let registration = Registration {
            id: "dascript-configuration".to_string(),
            method: "workspace/didChangeConfiguration".to_string(),
            register_options: None,
        };
        if let Err(e) = self.client.register_capability(vec![registration]).await {
            warn!("Failed to register for configuration changes: {}", e);
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("das-lsp shutting down");
        Ok(())
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        if self.has_configuration.load(Ordering::Relaxed) {
            self.document_settings.lock().unwrap().clear();
        } else {
            let section = params
                .settings
                .get(SETTINGS_SECTION)
                .cloned()
                .unwrap_or(Value::Null);
            *self.global_settings.lock().unwrap() = Settings::from_value(section);
        }
        self.revalidate_open_documents().await;
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        let removed: Vec<PathBuf> = params
            .event
            .removed
            .iter()
            .filter_map(folder_path)
            .collect();
        let added = params.event.added.iter().filter_map(folder_path);

        let mut folders = self.workspace_folders.lock().unwrap();
        folders.retain(|f| !removed.contains(f));
        for folder in added {
            if !folders.contains(&folder) {
                folders.push(folder);
            }
        }
        debug!("Workspace folders: {:?}", *folders);
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        self.client
            .log_message(MessageType::LOG, format!("[open {}]", uri))
            .await;
        self.documents
            .lock()
            .unwrap()
            .insert(uri.clone(), params.text_document.text);

        self.validate(&uri).await;
        self.refresh_completion(&uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        self.documents
            .lock()
            .unwrap()
            .insert(params.text_document.uri, change.text);
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        self.client
            .log_message(MessageType::LOG, format!("[save {}]", uri))
            .await;
        if let Some(text) = params.text {
            self.documents.lock().unwrap().insert(uri.clone(), text);
        }

        self.validate(&uri).await;
        self.refresh_completion(&uri).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.document_settings.lock().unwrap().remove(&uri);
        self.documents.lock().unwrap().remove(&uri);
        self.publisher.close(&self.client, &uri).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let position = params.text_document_position_params;
        let (settings, data) = self
            .cursor_data(&position.text_document.uri, position.position)
            .await;
        Ok(hover::hover(
            data.as_ref(),
            settings.verbose_hover,
            &self.completion,
        ))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        let (settings, data) = self
            .cursor_data(&position.text_document.uri, position.position)
            .await;
        let Some(data) = data else {
            return Ok(None);
        };
        Ok(hover::definition(&data, &self.resolver(&settings)).map(GotoDefinitionResponse::Scalar))
    }

    async fn completion(&self, _params: CompletionParams) -> Result<Option<CompletionResponse>> {
        Ok(Some(CompletionResponse::Array(self.completion.items())))
    }

    async fn completion_resolve(&self, item: CompletionItem) -> Result<CompletionItem> {
        Ok(item)
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let position = params.text_document_position_params;
        let text = self
            .documents
            .lock()
            .unwrap()
            .get(&position.text_document.uri)
            .cloned();
        Ok(text.and_then(|text| self.completion.signature_help(&text, position.position)))
    }
}
