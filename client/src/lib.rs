//! # Memory Scramble Client Library
//!
//! Remote access to a running Memory Scramble server. The server owns the
//! board; this crate only issues requests and parses the board views that come
//! back.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! A thin HTTP client for the four board operations:
//! - `look` returns the caller's current view
//! - `flip` turns over a card, possibly waiting for another player to let go
//! - `replace` relabels every card carrying one label
//! - `watch` long-polls until the board changes
//!
//! Every successful call yields a [`shared::BoardView`]. Refusals keep the
//! server's status code and message so callers can tell a bad request from a
//! lost race.
//!
//! ### Simulation Module (`simulation`)
//! Random concurrent players driving a remote server, for load and soak runs.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("127.0.0.1:8080");
//!
//!     let view = client.flip("alice", 0, 0).await?;
//!     println!("{}", view);
//!
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod simulation;
