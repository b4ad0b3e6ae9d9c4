//! Error types surfaced by the board.

use crate::board::Position;
use thiserror::Error;

/// Why a flip did not take effect.
///
/// Every variant leaves the board consistent and the caller may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlipError {
    #[error("position {position} is outside the {rows}x{cols} board")]
    InvalidPosition {
        position: Position,
        rows: usize,
        cols: usize,
    },

    #[error("no card at {0}")]
    NoCard(Position),

    #[error("card at {0} is controlled by another player")]
    Controlled(Position),

    #[error("timed out waiting for card at {0}")]
    TimedOut(Position),

    #[error("cancelled while waiting for card at {0}")]
    Cancelled(Position),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerIdError {
    #[error("player id must not be empty")]
    Empty,
}

/// A replacement label that could never appear on a card.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid card label: {0:?}")]
pub struct LabelError(pub String);

/// A broken board invariant, reported by [`crate::board::Board::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("card at {0} is controlled but face down")]
    OwnedFaceDown(Position),

    #[error("removed card at {0} is still face up or controlled")]
    RemovedVisible(Position),

    #[error("player {player} holds {position} but does not control it")]
    LostClaim { player: String, position: Position },

    #[error("player {player} controls {position} outside its current turn")]
    UntrackedClaim { player: String, position: Position },

    #[error("player {player} controls {count} cards")]
    TooManyClaims { player: String, count: usize },
}
