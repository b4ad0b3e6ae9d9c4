//! # Memory Scramble Server Library
//!
//! This library holds the authoritative Memory Scramble board and the HTTP
//! transport that exposes it. Any number of players flip cards on one shared
//! grid at the same time; the board decides who controls which card, resolves
//! matches and tells passive watchers when something changed.
//!
//! ## Core Responsibilities
//!
//! ### Turn Resolution
//! A turn is a first flip, a second flip and a deferred cleanup that runs when
//! the same player starts its next turn. Matched pairs are removed during that
//! cleanup; mismatched cards are turned back face down unless someone else
//! picked them up in the meantime.
//!
//! ### Contention
//! A first flip on a card controlled by another player waits until the card
//! is given up, then re-evaluates against whatever the card looks like now.
//! Second flips never wait: a missing or controlled card ends the turn.
//!
//! ### Change Notification
//! Every visible change advances a board-wide version counter. Watchers wait
//! for the counter to move, and bursts of changes coalesce into one wake-up.
//!
//! ## Architecture Design
//!
//! ### Single Writer, Many Readers
//! All grid and player state sits behind one async `RwLock`. Flips, cleanup
//! and relabelling hold it exclusively for their whole critical section, so
//! comparing two cards can never interleave with another mutation. Snapshots
//! only take the shared lock.
//!
//! ### Park and Re-check
//! Blocked flips park on a per-position queue with the lock released. Giving
//! up or removing a card wakes everyone parked on it; each waiter re-takes the
//! lock and checks the rules again.
//!
//! ## Module Organization
//!
//! ### Board Module (`board`)
//! The grid, the turn protocol, snapshots, relabelling and change waits.
//!
//! ### Card and Player Modules (`card`, `player`)
//! Per-cell state with its invariants, and per-player turn progress.
//!
//! ### Waiters Module (`waiters`)
//! Per-position wait queues and the change counter.
//!
//! ### Layout Module (`layout`)
//! Parses and validates the initial board description.
//!
//! ### Network Module (`network`)
//! HTTP routes for look, flip, replace and watch on top of `axum`.
//!
//! ### Simulation Module (`simulation`)
//! Random concurrent players against an in-process board, used for stress runs.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::board::Board;
//! use server::layout::Layout;
//! use server::network::{Server, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let board = Arc::new(Board::new(Layout::from_file("boards/ab.txt")?));
//!
//!     // Serve /look, /flip, /replace and /watch until the process exits
//!     let server = Server::new("127.0.0.1:8080", board, ServerConfig::default()).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod card;
pub mod error;
pub mod layout;
pub mod network;
pub mod player;
pub mod simulation;
pub mod waiters;
