//! Random remote players, each flipping cards over HTTP with short pauses.

use crate::network::{Client, ClientError};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RemoteSimulation {
    pub players: Vec<String>,
    pub moves: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RemoteSimulation {
    fn default() -> Self {
        Self {
            players: (1..=4).map(|i| format!("player{}", i)).collect(),
            moves: 100,
            min_delay: Duration::from_micros(100),
            max_delay: Duration::from_millis(2),
        }
    }
}

/// Per-player tally of how its flips went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerSummary {
    pub player: String,
    pub accepted: usize,
    pub refused: usize,
    pub failed: usize,
}

impl RemoteSimulation {
    /// Runs every player concurrently against `client`'s server.
    ///
    /// The board size is learned from one `look` before any player starts.
    pub async fn run(&self, client: &Client) -> Result<Vec<PlayerSummary>, ClientError> {
        let first = self.players.first().map(String::as_str).unwrap_or("observer");
        let view = client.look(first).await?;
        let (rows, cols) = (view.rows(), view.cols());
        info!(
            "Starting simulation with {} players, {} moves each on a {}x{} board",
            self.players.len(),
            self.moves,
            rows,
            cols
        );

        let mut handles = Vec::with_capacity(self.players.len());
        for player in &self.players {
            let client = client.clone();
            let player = player.clone();
            let plan = self.clone();
            handles.push(tokio::spawn(async move {
                plan.play(&client, player, rows, cols).await
            }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!("Player task crashed: {}", e),
            }
        }
        Ok(summaries)
    }

    async fn play(&self, client: &Client, player: String, rows: usize, cols: usize) -> PlayerSummary {
        let mut rng = StdRng::from_entropy();
        let mut summary = PlayerSummary {
            player,
            ..PlayerSummary::default()
        };

        let min = self.min_delay.as_micros() as u64;
        let max = (self.max_delay.as_micros() as u64).max(min);

        for i in 0..self.moves {
            tokio::time::sleep(Duration::from_micros(rng.gen_range(min..=max))).await;

            let (row, col) = (rng.gen_range(0..rows), rng.gen_range(0..cols));
            match client.flip(&summary.player, row, col).await {
                Ok(_) => summary.accepted += 1,
                Err(e) if e.is_conflict() => summary.refused += 1,
                Err(e) => {
                    warn!("[{}] Error on move {}: {}", summary.player, i + 1, e);
                    summary.failed += 1;
                }
            }

            if (i + 1) % 25 == 0 {
                debug!("[{}] Completed {}/{} moves", summary.player, i + 1, self.moves);
            }
        }

        info!("[{}] Finished all {} moves", summary.player, self.moves);
        summary
    }
}
