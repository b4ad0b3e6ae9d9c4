//! Player identity and per-player turn progress.

use crate::board::Position;
use crate::error::PlayerIdError;
use std::fmt;
use std::str::FromStr;

/// Opaque player token supplied by the caller on every operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(token: impl Into<String>) -> Result<Self, PlayerIdError> {
        let token = token.into();
        if token.is_empty() {
            return Err(PlayerIdError::Empty);
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PlayerId {
    type Err = PlayerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlayerId::new(s)
    }
}

/// Where a player stands within its current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Turn {
    /// No cards pending.
    #[default]
    Idle,
    /// Controls its first card and must flip a second one.
    First(Position),
    /// The second flip failed; the first card was given up but is still face
    /// up and gets turned down when the next turn starts.
    Relinquished(Position),
    /// Both cards flipped; resolved by cleanup when the next turn starts.
    Done {
        first: Position,
        second: Position,
        matched: bool,
    },
}

/// Turn progress for one player. Created on first contact, never evicted.
#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    turn: Turn,
}

impl PlayerState {
    pub fn turn(&self) -> Turn {
        self.turn
    }

    /// The first card of an unfinished turn.
    pub fn holding(&self) -> Option<Position> {
        match self.turn {
            Turn::First(pos) => Some(pos),
            _ => None,
        }
    }

    /// Positions claimed this turn, at most two.
    pub fn pending(&self) -> Vec<Position> {
        match self.turn {
            Turn::Idle | Turn::Relinquished(_) => Vec::new(),
            Turn::First(pos) => vec![pos],
            Turn::Done { first, second, .. } => vec![first, second],
        }
    }

    /// Positions this player may legitimately control right now.
    pub fn claims(&self) -> Vec<Position> {
        match self.turn {
            Turn::First(pos) => vec![pos],
            Turn::Done {
                first,
                second,
                matched: true,
            } => vec![first, second],
            _ => Vec::new(),
        }
    }

    pub fn matched(&self) -> bool {
        matches!(self.turn, Turn::Done { matched: true, .. })
    }

    /// Starts a turn on `pos`. Returns false, changing nothing, unless the
    /// player is idle.
    pub(crate) fn hold_first(&mut self, pos: Position) -> bool {
        if self.turn != Turn::Idle {
            return false;
        }
        self.turn = Turn::First(pos);
        true
    }

    pub(crate) fn finish(&mut self, second: Position, matched: bool) {
        if let Turn::First(first) = self.turn {
            self.turn = Turn::Done {
                first,
                second,
                matched,
            };
        }
    }

    pub(crate) fn relinquish(&mut self) {
        if let Turn::First(first) = self.turn {
            self.turn = Turn::Relinquished(first);
        }
    }

    /// Ends the previous turn, handing back what it left on the board.
    pub(crate) fn take_turn(&mut self) -> Turn {
        std::mem::take(&mut self.turn)
    }
}
