//! Session lifecycle tests against the real server binary
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tower_lsp::lsp_types::Url;

use das_lsp::config::SessionConfig;
use das_lsp::session::{ProcessLauncher, RootKey, SessionManager, SessionState};

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Runs the server binary with its log directory inside `data`.
fn server_config(data: &TempDir, base_port: u16) -> SessionConfig {
    SessionConfig::new(
        "env",
        vec![
            format!("XDG_DATA_HOME={}", data.path().display()),
            env!("CARGO_BIN_EXE_das-lsp").to_string(),
            "--port".to_string(),
            "${port}".to_string(),
        ],
    )
    .with_base_port(base_port)
    .with_connect_timeout(Duration::from_secs(10))
}

async fn send(stream: &mut DuplexStream, message: Value) {
    let body = message.to_string();
    let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    stream.write_all(frame.as_bytes()).await.unwrap();
}

async fn receive(stream: &mut DuplexStream) -> Value {
    let mut reader = BufReader::new(stream);
    let mut length = 0;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length: ") {
            length = value.parse().unwrap();
        }
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn wait_until_gone(manager: &SessionManager, root: &RootKey) {
    for _ in 0..250 {
        if manager.state(root).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session for {} still present", root);
}

#[tokio::test(flavor = "multi_thread")]
async fn untitled_session_serves_lsp_over_stream() {
    let data = TempDir::new().unwrap();
    let port = free_port().await;
    let manager = SessionManager::new(
        server_config(&data, port),
        Arc::new(ProcessLauncher::new()),
    );

    let mut session = manager
        .open_document(&Url::parse("untitled:Untitled-1").unwrap())
        .await
        .expect("Expected a new session");
    assert_eq!(session.root, RootKey::Untitled);
    assert_eq!(session.port, port);

    send(
        &mut session.stream,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "capabilities": {} }
        }),
    )
    .await;
    let response = receive(&mut session.stream).await;

    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["serverInfo"]["name"], "das-lsp");
    assert_eq!(
        response["result"]["capabilities"]["hoverProvider"],
        json!(true)
    );

    let root = session.root.clone();
    drop(session);
    wait_until_gone(&manager, &root).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_folder_stops_its_server() {
    let data = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let folder = Url::from_directory_path(workspace.path()).unwrap();
    let port = free_port().await;

    let manager = SessionManager::new(
        server_config(&data, port - 1),
        Arc::new(ProcessLauncher::new()),
    );
    manager.set_workspace_folders(&[folder.clone()]);

    let mut session = manager
        .open_document(&folder.join("main.das").unwrap())
        .await
        .expect("Expected a new session");
    assert_eq!(session.port, port);

    manager.remove_folder(&folder);

    wait_until_gone(&manager, &session.root).await;
    let mut rest = Vec::new();
    let read = session.stream.read_to_end(&mut rest).await;
    assert!(matches!(read, Ok(0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_exit_ends_session_and_allows_respawn() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut peers = Vec::new();
        while let Ok((peer, _)) = listener.accept().await {
            peers.push(peer);
        }
    });

    let scratch = TempDir::new().unwrap();
    let config = SessionConfig::new(
        "sh",
        vec!["-c".to_string(), "touch started && sleep 0.3".to_string()],
    )
    .with_base_port(port)
    .with_cwd(scratch.path())
    .with_connect_timeout(Duration::from_secs(10));
    let manager = SessionManager::new(config, Arc::new(ProcessLauncher::new()));
    let document = Url::parse("untitled:Untitled-1").unwrap();

    let mut session = manager
        .open_document(&document)
        .await
        .expect("Expected a new session");
    assert_eq!(manager.state(&session.root), Some(SessionState::Connected));

    wait_until_gone(&manager, &session.root).await;
    let mut rest = Vec::new();
    let read = session.stream.read_to_end(&mut rest).await;
    assert!(matches!(read, Ok(0)));
    assert!(scratch.path().join("started").exists());

    let again = manager.open_document(&document).await;
    assert!(again.is_some());
}
