use clap::{Parser, Subcommand};
use client::network::Client;
use client::simulation::RemoteSimulation;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Command-line player for a Memory Scramble server")]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the board as PLAYER sees it
    Look { player: String },

    /// Flip the card at ROW,COL
    Flip {
        player: String,
        row: usize,
        col: usize,
    },

    /// Replace every FROM label with TO
    Replace {
        player: String,
        from: String,
        to: String,
    },

    /// Wait for the board to change
    Watch {
        player: String,

        /// Give up after this many milliseconds (server default when unset)
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Run random players against the server
    Simulate {
        /// Number of concurrent players
        #[arg(short, long, default_value_t = 4)]
        players: usize,

        /// Flips per player
        #[arg(short, long, default_value_t = 100)]
        moves: usize,

        /// Longest pause between flips, in milliseconds
        #[arg(long, default_value_t = 2)]
        max_delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let client = Client::new(&args.server);
    info!("Connecting to: {}", client.base_url());

    let view = match args.command {
        Command::Look { player } => client.look(&player).await?,
        Command::Flip { player, row, col } => client.flip(&player, row, col).await?,
        Command::Replace { player, from, to } => client.replace(&player, &from, &to).await?,
        Command::Watch { player, timeout_ms } => {
            client
                .watch(&player, timeout_ms.map(Duration::from_millis))
                .await?
        }
        Command::Simulate {
            players,
            moves,
            max_delay_ms,
        } => {
            let sim = RemoteSimulation {
                players: (1..=players).map(|i| format!("player{}", i)).collect(),
                moves,
                max_delay: Duration::from_millis(max_delay_ms),
                ..RemoteSimulation::default()
            };

            for summary in sim.run(&client).await? {
                println!(
                    "{}: {} accepted, {} refused, {} failed",
                    summary.player, summary.accepted, summary.refused, summary.failed
                );
            }
            println!("Simulation complete");
            return Ok(());
        }
    };

    print!("{}", view);
    Ok(())
}
