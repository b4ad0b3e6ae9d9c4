use clap::Parser;
use log::info;
use server::board::Board;
use server::layout::Layout;
use server::simulation::{self, SimulationConfig};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stress a Memory Scramble board with random concurrent players")]
struct Args {
    /// Board layout file; a random board of pairs is used when omitted
    #[arg(short, long)]
    board: Option<String>,

    /// Rows of the random board
    #[arg(long, default_value_t = 5)]
    rows: usize,

    /// Columns of the random board
    #[arg(long, default_value_t = 5)]
    cols: usize,

    /// Number of concurrent players
    #[arg(short, long, default_value_t = 4)]
    players: usize,

    /// Flips per player
    #[arg(short, long, default_value_t = 100)]
    moves: usize,

    /// Longest random pause before each flip, in milliseconds
    #[arg(long, default_value_t = 2)]
    max_delay_ms: u64,

    /// How long a blocked first flip waits, in milliseconds
    #[arg(long, default_value_t = 50)]
    flip_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let layout = match &args.board {
        Some(path) => Layout::from_file(path)?,
        None => simulation::shuffled_pairs(args.rows, args.cols)?,
    };
    let board = Arc::new(Board::new(layout));
    info!("Initial board\n{}", board.dump().await);

    let config = SimulationConfig {
        players: args.players,
        moves: args.moves,
        max_delay: Duration::from_millis(args.max_delay_ms),
        flip_timeout: Duration::from_millis(args.flip_timeout_ms),
    };

    let report = simulation::run(Arc::clone(&board), &config).await?;
    info!("Final board\n{}", board.dump().await);

    println!("Moves:       {}", report.moves());
    println!("  first:     {}", report.first);
    println!("  matched:   {}", report.matched);
    println!("  missed:    {}", report.mismatched);
    println!("  no card:   {}", report.no_card);
    println!("  contended: {}", report.controlled);
    println!("  timed out: {}", report.timed_out);
    println!("  rejected:  {}", report.rejected);
    println!("Cards left:  {}", report.cards_left);
    println!("Simulation completed - invariants held");

    Ok(())
}
