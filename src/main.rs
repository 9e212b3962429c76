use clap::Parser;

use das_lsp::lsp::server::{run_server, run_tcp_server};

#[derive(Debug, Parser)]
#[command(name = "das-lsp", version, about = "Language server for daScript")]
struct Cli {
    /// Serve a single client over TCP on 127.0.0.1:<PORT> instead of stdio
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.port {
        Some(port) => run_tcp_server(port).await,
        None => run_server().await,
    }
}
