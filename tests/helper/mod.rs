//! Shared fixtures for the end-to-end tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower_lsp::ClientSocket;
use tower_lsp::jsonrpc::Request;

use das_lsp::compiler::{Invocation, Runner};

/// Compiler stand-in answering from canned output.
///
/// Cursor queries (arguments containing `-cursor`) get the cursor output;
/// other runs get the output registered for the file they compile, matched
/// by path suffix.
#[derive(Default)]
pub struct FakeRunner {
    cursor_output: Mutex<String>,
    file_outputs: Mutex<HashMap<String, String>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cursor_output(&self, output: &str) {
        *self.cursor_output.lock().unwrap() = output.to_string();
    }

    pub fn set_file_output(&self, suffix: &str, output: &str) {
        self.file_outputs
            .lock()
            .unwrap()
            .insert(suffix.to_string(), output.to_string());
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> String {
        self.invocations.lock().unwrap().push(invocation.clone());

        if invocation.args.iter().any(|a| a == "-cursor") {
            return self.cursor_output.lock().unwrap().clone();
        }
        let outputs = self.file_outputs.lock().unwrap();
        invocation
            .args
            .iter()
            .find_map(|arg| {
                outputs
                    .iter()
                    .find(|(suffix, _)| arg.ends_with(suffix.as_str()))
                    .map(|(_, output)| output.clone())
            })
            .unwrap_or_default()
    }
}

pub fn create_initialize_request(id: i64) -> Request {
    create_initialize_request_with(id, json!({}), None)
}

pub fn create_initialize_request_with(
    id: i64,
    capabilities: Value,
    workspace_folders: Option<Value>,
) -> Request {
    Request::build("initialize")
        .id(id)
        .params(json!({
            "capabilities": capabilities,
            "workspaceFolders": workspace_folders,
        }))
        .finish()
}

pub fn create_initialized_notification() -> Request {
    Request::build("initialized").params(json!({})).finish()
}

pub fn create_did_open_notification(uri: &str, text: &str) -> Request {
    Request::build("textDocument/didOpen")
        .params(json!({
            "textDocument": {
                "uri": uri,
                "languageId": "dascript",
                "version": 1,
                "text": text,
            }
        }))
        .finish()
}

pub fn create_did_save_notification(uri: &str) -> Request {
    Request::build("textDocument/didSave")
        .params(json!({ "textDocument": { "uri": uri } }))
        .finish()
}

pub fn create_did_change_notification(uri: &str, text: &str) -> Request {
    Request::build("textDocument/didChange")
        .params(json!({
            "textDocument": { "uri": uri, "version": 2 },
            "contentChanges": [{ "text": text }],
        }))
        .finish()
}

pub fn create_did_close_notification(uri: &str) -> Request {
    Request::build("textDocument/didClose")
        .params(json!({ "textDocument": { "uri": uri } }))
        .finish()
}

pub fn create_position_request(id: i64, method: &'static str, uri: &str, line: u32, character: u32) -> Request {
    Request::build(method)
        .id(id)
        .params(json!({
            "textDocument": { "uri": uri },
            "position": { "line": line, "character": character },
        }))
        .finish()
}

/// Forwards every server-to-client message into a channel.
pub fn spawn_notification_collector(mut socket: ClientSocket) -> mpsc::UnboundedReceiver<Request> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(request) = socket.next().await {
            if tx.send(request).is_err() {
                break;
            }
        }
    });
    rx
}

/// Next message with the given method, skipping others.
pub async fn wait_for_notification(
    rx: &mut mpsc::UnboundedReceiver<Request>,
    method: &str,
) -> Option<Request> {
    let wait = async {
        while let Some(request) = rx.recv().await {
            if request.method() == method {
                return Some(request);
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .ok()
        .flatten()
}
