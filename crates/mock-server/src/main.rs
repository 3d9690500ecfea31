use std::io::{IsTerminal, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mock_server::{watcher, MockServer};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock",
    about = "Start a mock server with a REST Client file, directory or <stdin>."
)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value_t = 7777)]
    port: u16,

    /// URL path for the request log UI and its SSE stream
    #[arg(short = 'l', long = "log-path", default_value = "/mock")]
    log_path: String,

    #[arg(short, long)]
    verbose: bool,

    /// Spec file (.http) or directory to serve; reads stdin when omitted
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    if let Err(err) = run(args).await {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    match args.input.as_deref() {
        None => run_stdin(addr, &args.log_path).await,
        Some(path) => {
            let meta = std::fs::metadata(path)
                .with_context(|| format!("cannot open {}", path.display()))?;
            if meta.is_dir() {
                run_static(addr, &args.log_path, path).await
            } else if meta.is_file() {
                run_file(addr, &args.log_path, path).await
            } else {
                anyhow::bail!("{} is not a regular file or directory", path.display())
            }
        }
    }
}

async fn run_stdin(addr: SocketAddr, log_path: &str) -> anyhow::Result<()> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        anyhow::bail!("no input file given and stdin is a terminal; see --help");
    }

    let mut spec = Vec::new();
    stdin.read_to_end(&mut spec).context("failed to read stdin")?;
    if spec.is_empty() {
        anyhow::bail!("stdin was empty; see --help");
    }

    let endpoints = mock_core::endpoints_from_reader(&spec[..])?;
    let server = MockServer::new(log_path);
    server.install(endpoints);
    server.run(addr).await
}

async fn run_file(addr: SocketAddr, log_path: &str, path: &Path) -> anyhow::Result<()> {
    let endpoints = mock_core::endpoints_from_file(path)?;
    let server = MockServer::new(log_path);
    server.install(endpoints);

    // keep the watcher alive for the whole server lifetime
    let _watcher = watcher::watch_spec(path, Arc::clone(&server))?;

    server.run(addr).await
}

async fn run_static(addr: SocketAddr, log_path: &str, root: &Path) -> anyhow::Result<()> {
    let server = MockServer::with_static_root(log_path, root.to_path_buf());
    server.run(addr).await
}
