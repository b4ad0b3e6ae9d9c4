//! Board layout files.
//!
//! A layout file starts with a `ROWSxCOLS` header followed by one card label
//! per line in row-major order. Blank lines are ignored and labels are trimmed.

use crate::card::is_valid_label;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read layout: {0}")]
    Io(#[from] std::io::Error),

    #[error("layout is empty")]
    MissingHeader,

    #[error("malformed dimensions: {0:?}")]
    BadDimensions(String),

    #[error("board must have at least one row and one column, got {rows}x{cols}")]
    EmptyBoard { rows: usize, cols: usize },

    #[error("card {index} has an invalid label: {label:?}")]
    BadLabel { index: usize, label: String },

    #[error("expected {expected} cards, found {found}")]
    CardCount { expected: usize, found: usize },
}

/// A validated initial board: dimensions plus one label per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    rows: usize,
    cols: usize,
    labels: Vec<String>,
}

impl Layout {
    pub fn new(rows: usize, cols: usize, labels: Vec<String>) -> Result<Self, LayoutError> {
        if rows == 0 || cols == 0 {
            return Err(LayoutError::EmptyBoard { rows, cols });
        }

        if let Some((index, label)) = labels
            .iter()
            .enumerate()
            .find(|(_, label)| !is_valid_label(label))
        {
            return Err(LayoutError::BadLabel {
                index,
                label: label.clone(),
            });
        }

        if labels.len() != rows * cols {
            return Err(LayoutError::CardCount {
                expected: rows * cols,
                found: labels.len(),
            });
        }

        Ok(Self { rows, cols, labels })
    }

    pub fn parse(text: &str) -> Result<Self, LayoutError> {
        let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
        let header = lines.next().ok_or(LayoutError::MissingHeader)?;

        let (rows, cols) = header
            .split_once('x')
            .and_then(|(r, c)| Some((r.trim().parse().ok()?, c.trim().parse().ok()?)))
            .ok_or_else(|| LayoutError::BadDimensions(header.to_string()))?;

        let labels = lines.map(str::to_string).collect();
        Layout::new(rows, cols, labels)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let text = std::fs::read_to_string(path)?;
        Layout::parse(&text)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub(crate) fn into_labels(self) -> Vec<String> {
        self.labels
    }
}

impl FromStr for Layout {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layout::parse(s)
    }
}
