use clap::Parser;
use log::{error, info};
use server::board::Board;
use server::layout::Layout;
use server::network::{Server, ServerConfig};
use shared::{DEFAULT_PORT, DEFAULT_WATCH_TIMEOUT_MS};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Memory Scramble board server")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Board layout file
    #[arg(short, long, default_value = "boards/ab.txt")]
    board: String,

    /// Give up on a blocked first flip after this many milliseconds (waits
    /// until the request is dropped when unset)
    #[arg(long)]
    flip_timeout_ms: Option<u64>,

    /// Default long-poll duration for /watch
    #[arg(long, default_value_t = DEFAULT_WATCH_TIMEOUT_MS)]
    watch_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: Set RUST_LOG=info or RUST_LOG=debug for detailed logging");
    }

    let args = Args::parse();

    let layout = Layout::from_file(&args.board)?;
    let board = Arc::new(Board::new(layout));
    info!("Loaded {}\n{}", args.board, board.dump().await);

    let config = ServerConfig {
        flip_timeout: args.flip_timeout_ms.map(Duration::from_millis),
        watch_timeout: Duration::from_millis(args.watch_timeout_ms),
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, board, config).await?;
    info!("Serving Memory Scramble on http://{}", server.local_addr()?);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    };

    if let Err(e) = server.run_until(shutdown).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
