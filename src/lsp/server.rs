use tokio::net::TcpListener;
use tower_lsp::{LspService, Server};
use tracing::info;

use crate::log::init;
use crate::lsp::backend::Backend;

/// Serves one client over stdin/stdout.
pub async fn run_server() -> anyhow::Result<()> {
    let _guard = init()?;

    info!("Starting das-lsp server on stdio");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    info!("das-lsp server stopped");
    Ok(())
}

/// Listens on a local port and serves the first client that connects.
pub async fn run_tcp_server(port: u16) -> anyhow::Result<()> {
    let _guard = init()?;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    info!("Accepted client {}", peer);
    drop(listener);

    let (read, write) = tokio::io::split(stream);
    let (service, socket) = LspService::new(Backend::new);
    Server::new(read, write, socket).serve(service).await;

    info!("das-lsp server on port {} stopped", port);
    Ok(())
}
