//! In-process stress runs: many random players flipping on one board.

use crate::board::{Board, FlipOutcome, Position};
use crate::error::{FlipError, InvariantError, PlayerIdError};
use crate::layout::{Layout, LayoutError};
use crate::player::PlayerId;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub players: usize,
    pub moves: usize,
    /// Upper bound on the random pause before each flip.
    pub max_delay: Duration,
    /// How long a blocked first flip waits. Players keep their last cards
    /// when they finish, so an unbounded wait could never end.
    pub flip_timeout: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            players: 4,
            moves: 100,
            max_delay: Duration::from_millis(2),
            flip_timeout: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("player task crashed: {0}")]
    Crashed(#[from] tokio::task::JoinError),

    #[error("board invariant broken: {0}")]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Player(#[from] PlayerIdError),
}

/// Tally of flip results across every player.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub first: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub no_card: usize,
    pub controlled: usize,
    pub timed_out: usize,
    /// Flips refused outright: cancelled, or off the board.
    pub rejected: usize,
    /// Cards still on the board after the run.
    pub cards_left: usize,
}

impl SimulationReport {
    pub fn moves(&self) -> usize {
        self.first
            + self.matched
            + self.mismatched
            + self.no_card
            + self.controlled
            + self.timed_out
            + self.rejected
    }

    fn record(&mut self, outcome: &Result<FlipOutcome, FlipError>) {
        match outcome {
            Ok(FlipOutcome::First { .. }) => self.first += 1,
            Ok(FlipOutcome::Matched) => self.matched += 1,
            Ok(FlipOutcome::Mismatched) => self.mismatched += 1,
            Err(FlipError::NoCard(_)) => self.no_card += 1,
            Err(FlipError::Controlled(_)) => self.controlled += 1,
            Err(FlipError::TimedOut(_)) => self.timed_out += 1,
            Err(FlipError::Cancelled(_) | FlipError::InvalidPosition { .. }) => self.rejected += 1,
        }
    }
}

impl AddAssign for SimulationReport {
    fn add_assign(&mut self, other: Self) {
        self.first += other.first;
        self.matched += other.matched;
        self.mismatched += other.mismatched;
        self.no_card += other.no_card;
        self.controlled += other.controlled;
        self.timed_out += other.timed_out;
        self.rejected += other.rejected;
    }
}

/// A `rows` x `cols` layout of shuffled pairs. An odd-sized board gets one
/// unpaired card.
pub fn shuffled_pairs(rows: usize, cols: usize) -> Result<Layout, LayoutError> {
    let count = rows * cols;
    let mut labels: Vec<String> = (0..count).map(|i| pair_label(i / 2)).collect();
    labels.shuffle(&mut rand::thread_rng());
    Layout::new(rows, cols, labels)
}

fn pair_label(pair: usize) -> String {
    let letter = (b'A' + (pair % 26) as u8) as char;
    match pair / 26 {
        0 => letter.to_string(),
        round => format!("{}{}", letter, round),
    }
}

/// Runs every player to completion, then checks the board.
pub async fn run(
    board: Arc<Board>,
    config: &SimulationConfig,
) -> Result<SimulationReport, SimulationError> {
    info!(
        "Starting simulation: {} players, {} moves each",
        config.players, config.moves
    );

    let mut handles = Vec::with_capacity(config.players);
    for i in 0..config.players {
        let player = PlayerId::new(format!("player{}", i))?;
        let board = Arc::clone(&board);
        let config = config.clone();
        handles.push(tokio::spawn(play(board, player, config)));
    }

    let mut report = SimulationReport::default();
    for handle in handles {
        report += handle.await?;
    }

    board.check_invariants().await?;

    let observer = PlayerId::new("simulation")?;
    report.cards_left = board.inspect(&observer).await.remaining();
    info!("Simulation finished: {:?}", report);
    Ok(report)
}

async fn play(board: Arc<Board>, player: PlayerId, config: SimulationConfig) -> SimulationReport {
    let mut rng = StdRng::from_entropy();
    let mut report = SimulationReport::default();
    let max_delay = config.max_delay.as_micros() as u64;

    for i in 0..config.moves {
        tokio::time::sleep(Duration::from_micros(rng.gen_range(0..=max_delay))).await;

        let pos = Position::new(rng.gen_range(0..board.rows()), rng.gen_range(0..board.cols()));
        let outcome = board
            .flip_until(&player, pos, Some(config.flip_timeout), std::future::pending())
            .await;
        report.record(&outcome);

        if (i + 1) % 25 == 0 {
            debug!("[{}] Completed {}/{} moves", player, i + 1, config.moves);
        }
    }

    info!("[{}] Finished all {} moves", player, config.moves);
    report
}
