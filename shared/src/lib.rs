//! Board snapshot types shared by the server and its clients.
//!
//! A [`BoardView`] is one player's view of the board: every cell is a [`Spot`]
//! and the whole view travels over the wire in a line-oriented text format:
//!
//! ```text
//! 2x2
//! none
//! down
//! up A
//! my B
//! ```
//!
//! The first line is `ROWSxCOLS`, followed by exactly `ROWS * COLS` spots in
//! row-major order.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WATCH_TIMEOUT_MS: u64 = 30_000;

/// One cell of a board as seen by a particular player.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Spot {
    /// The card has been removed from the board.
    None,
    /// Face down, value hidden.
    Down,
    /// Face up and not controlled by the viewer.
    Up(String),
    /// Face up and controlled by the viewer.
    My(String),
}

impl Spot {
    /// Label shown on this spot, if the card is face up.
    pub fn label(&self) -> Option<&str> {
        match self {
            Spot::Up(label) | Spot::My(label) => Some(label),
            Spot::None | Spot::Down => None,
        }
    }

    pub fn is_mine(&self) -> bool {
        matches!(self, Spot::My(_))
    }
}

impl fmt::Display for Spot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spot::None => write!(f, "none"),
            Spot::Down => write!(f, "down"),
            Spot::Up(label) => write!(f, "up {}", label),
            Spot::My(label) => write!(f, "my {}", label),
        }
    }
}

impl FromStr for Spot {
    type Err = ViewError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.split_once(' ') {
            None if line == "none" => Ok(Spot::None),
            None if line == "down" => Ok(Spot::Down),
            Some(("up", label)) if !label.is_empty() => Ok(Spot::Up(label.to_string())),
            Some(("my", label)) if !label.is_empty() => Ok(Spot::My(label.to_string())),
            _ => Err(ViewError::BadSpot(line.to_string())),
        }
    }
}

/// Errors raised while parsing a [`BoardView`] from its text form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("missing board header")]
    MissingHeader,

    #[error("malformed board header: {0:?}")]
    BadHeader(String),

    #[error("malformed spot: {0:?}")]
    BadSpot(String),

    #[error("expected {expected} spots, found {found}")]
    SpotCount { expected: usize, found: usize },
}

/// A full grid of spots for one viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardView {
    rows: usize,
    cols: usize,
    spots: Vec<Spot>,
}

impl BoardView {
    /// Builds a view from row-major spots.
    ///
    /// Returns an error if the number of spots does not match the dimensions.
    pub fn new(rows: usize, cols: usize, spots: Vec<Spot>) -> Result<Self, ViewError> {
        if spots.len() != rows * cols {
            return Err(ViewError::SpotCount {
                expected: rows * cols,
                found: spots.len(),
            });
        }
        Ok(Self { rows, cols, spots })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    /// Spot at `(row, col)`, or `None` when outside the grid.
    pub fn spot(&self, row: usize, col: usize) -> Option<&Spot> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.spots.get(row * self.cols + col)
    }

    /// Number of cards still on the board.
    pub fn remaining(&self) -> usize {
        self.spots.iter().filter(|s| **s != Spot::None).count()
    }

    /// Positions the viewer currently controls.
    pub fn mine(&self) -> Vec<(usize, usize)> {
        self.spots
            .iter()
            .enumerate()
            .filter(|(_, spot)| spot.is_mine())
            .map(|(i, _)| (i / self.cols, i % self.cols))
            .collect()
    }
}

impl fmt::Display for BoardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}x{}", self.rows, self.cols)?;
        for spot in &self.spots {
            writeln!(f, "{}", spot)?;
        }
        Ok(())
    }
}

impl FromStr for BoardView {
    type Err = ViewError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut lines = text.lines();
        let header = lines.next().ok_or(ViewError::MissingHeader)?;

        let (rows, cols) = header
            .split_once('x')
            .and_then(|(r, c)| Some((r.parse::<usize>().ok()?, c.parse::<usize>().ok()?)))
            .ok_or_else(|| ViewError::BadHeader(header.to_string()))?;

        let spots = lines
            .map(str::parse::<Spot>)
            .collect::<Result<Vec<_>, _>>()?;

        BoardView::new(rows, cols, spots)
    }
}
