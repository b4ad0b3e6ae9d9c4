//! The shared Memory Scramble board and its turn protocol.
//!
//! All grid and player state lives behind one `RwLock`. Flips, cleanup and
//! relabelling take it exclusively for their whole critical section, so the
//! two-card comparison can never interleave with another mutation. Inspection
//! only needs a shared lock.
//!
//! A first flip on a card controlled by another player parks on that card's
//! wait queue. The lock is released while parked and re-taken on wake-up, after
//! which every rule is evaluated again against the current card.

use crate::card::{is_valid_label, Card, CardState};
use crate::error::{FlipError, InvariantError, LabelError};
use crate::layout::Layout;
use crate::player::{PlayerId, PlayerState, Turn};
use crate::waiters::{ChangeFeed, ChangeWatcher, WaitRegistry};
use log::{debug, info};
use shared::BoardView;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// 0-based grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Result of a successful flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipOutcome {
    /// Took control of a first card; `turned_up` if it was face down.
    First { turned_up: bool },
    /// Second card matched the first. Both stay controlled until next turn.
    Matched,
    /// Second card differed. Both are face up and free.
    Mismatched,
}

/// How a wait for a board change ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Changed(u64),
    TimedOut,
    Cancelled,
}

struct State {
    cols: usize,
    cards: Vec<Card>,
    players: HashMap<PlayerId, PlayerState>,
    waiters: WaitRegistry,
    // a visible change happened that watchers have not been told about
    dirty: bool,
}

enum FirstAttempt {
    Done(Result<FlipOutcome, FlipError>),
    Blocked,
    // another call with the same token started a turn while this one waited
    TurnInProgress,
}

impl State {
    fn card(&self, pos: Position) -> &Card {
        &self.cards[pos.row * self.cols + pos.col]
    }

    fn card_mut(&mut self, pos: Position) -> &mut Card {
        &mut self.cards[pos.row * self.cols + pos.col]
    }

    fn player_mut(&mut self, player: &PlayerId) -> &mut PlayerState {
        if !self.players.contains_key(player) {
            debug!("Registered player {}", player);
        }
        self.players.entry(player.clone()).or_default()
    }

    /// Resolves whatever the player's previous turn left on the board.
    ///
    /// Matched pairs still controlled by the player are removed; anything else
    /// still face up and free is turned back down. Cards picked up by someone
    /// else in the meantime are left alone.
    fn cleanup(&mut self, player: &PlayerId) {
        match self.player_mut(player).take_turn() {
            Turn::Idle => {}
            Turn::First(pos) => {
                self.release(pos);
                self.hide_if_free(pos);
            }
            Turn::Relinquished(pos) => self.hide_if_free(pos),
            Turn::Done {
                first,
                second,
                matched: true,
            } => {
                self.remove_if_owned(first, player);
                self.remove_if_owned(second, player);
            }
            Turn::Done {
                first,
                second,
                matched: false,
            } => {
                self.hide_if_free(first);
                self.hide_if_free(second);
            }
        }
    }

    fn remove_if_owned(&mut self, pos: Position, player: &PlayerId) {
        if self.card(pos).is_owned_by(player) {
            self.card_mut(pos).remove();
            self.dirty = true;
            let woken = self.waiters.wake_all(pos);
            info!("Player {} removed matched card at {}", player, pos);
            if woken > 0 {
                debug!("Woke {} waiters on removed card {}", woken, pos);
            }
        }
    }

    fn hide_if_free(&mut self, pos: Position) {
        if self.card_mut(pos).turn_down_if_free() {
            debug!("Turned card at {} face down", pos);
            self.dirty = true;
        }
    }

    fn release(&mut self, pos: Position) {
        if self.card_mut(pos).release() {
            self.waiters.wake_all(pos);
        }
    }

    fn try_flip_first(&mut self, player: &PlayerId, pos: Position) -> FirstAttempt {
        let turned_up = match self.card(pos).state() {
            CardState::Removed => {
                debug!("Player {} found no card at {}", player, pos);
                return FirstAttempt::Done(Err(FlipError::NoCard(pos)));
            }
            CardState::Owned(owner) if owner != player => return FirstAttempt::Blocked,
            CardState::FaceDown => true,
            CardState::FaceUp | CardState::Owned(_) => false,
        };

        if !self.player_mut(player).hold_first(pos) {
            return FirstAttempt::TurnInProgress;
        }

        let card = self.card_mut(pos);
        card.turn_up();
        card.claim(player);
        self.dirty |= turned_up;

        debug!("Player {} took first card at {}", player, pos);
        FirstAttempt::Done(Ok(FlipOutcome::First { turned_up }))
    }

    fn flip_second(
        &mut self,
        player: &PlayerId,
        first: Position,
        pos: Position,
    ) -> Result<FlipOutcome, FlipError> {
        let refusal = match self.card(pos).state() {
            CardState::Removed => Some(FlipError::NoCard(pos)),
            CardState::Owned(owner) if owner != player => Some(FlipError::Controlled(pos)),
            _ => None,
        };

        if let Some(err) = refusal {
            debug!("Player {} gives up {}: {}", player, first, err);
            self.release(first);
            self.player_mut(player).relinquish();
            return Err(err);
        }

        let turned_up = self.card_mut(pos).turn_up();
        self.dirty |= turned_up;

        let matched = self.card(first).label().is_some()
            && self.card(first).label() == self.card(pos).label();

        if matched {
            self.card_mut(pos).claim(player);
            debug!("Player {} matched {} and {}", player, first, pos);
        } else {
            self.card_mut(pos).release();
            self.release(first);
            debug!("Player {} missed with {} and {}", player, first, pos);
        }

        self.player_mut(player).finish(pos, matched);
        Ok(if matched {
            FlipOutcome::Matched
        } else {
            FlipOutcome::Mismatched
        })
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        for (i, card) in self.cards.iter().enumerate() {
            let pos = Position::new(i / self.cols, i % self.cols);
            if card.is_removed() && (card.is_face_up() || card.owner().is_some()) {
                return Err(InvariantError::RemovedVisible(pos));
            }
            if card.owner().is_some() && !card.is_face_up() {
                return Err(InvariantError::OwnedFaceDown(pos));
            }
        }

        for (player, state) in &self.players {
            if let Some(pos) = state.holding() {
                if !self.card(pos).is_owned_by(player) {
                    return Err(InvariantError::LostClaim {
                        player: player.to_string(),
                        position: pos,
                    });
                }
            }
        }

        let mut owned: HashMap<&PlayerId, Vec<Position>> = HashMap::new();
        for (i, card) in self.cards.iter().enumerate() {
            if let Some(owner) = card.owner() {
                owned
                    .entry(owner)
                    .or_default()
                    .push(Position::new(i / self.cols, i % self.cols));
            }
        }

        for (owner, positions) in owned {
            if positions.len() > 2 {
                return Err(InvariantError::TooManyClaims {
                    player: owner.to_string(),
                    count: positions.len(),
                });
            }
            let claims = self
                .players
                .get(owner)
                .map(PlayerState::claims)
                .unwrap_or_default();
            if let Some(&pos) = positions.iter().find(|pos| !claims.contains(pos)) {
                return Err(InvariantError::UntrackedClaim {
                    player: owner.to_string(),
                    position: pos,
                });
            }
        }
        Ok(())
    }
}

/// A Memory Scramble board shared by any number of concurrent players.
pub struct Board {
    rows: usize,
    cols: usize,
    state: RwLock<State>,
    changes: ChangeFeed,
}

impl Board {
    /// Builds a board with every card face down.
    pub fn new(layout: Layout) -> Self {
        let (rows, cols) = (layout.rows(), layout.cols());
        let cards = layout.into_labels().into_iter().map(Card::new).collect();

        Self {
            rows,
            cols,
            state: RwLock::new(State {
                cols,
                cards,
                players: HashMap::new(),
                waiters: WaitRegistry::new(),
                dirty: false,
            }),
            changes: ChangeFeed::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn check_position(&self, pos: Position) -> Result<(), FlipError> {
        if pos.row < self.rows && pos.col < self.cols {
            Ok(())
        } else {
            Err(FlipError::InvalidPosition {
                position: pos,
                rows: self.rows,
                cols: self.cols,
            })
        }
    }

    fn publish(&self, state: &mut State) {
        if std::mem::take(&mut state.dirty) {
            self.changes.publish();
        }
    }

    /// Flips the card at `pos` for `player`, waiting as long as it takes if
    /// the card is controlled by someone else.
    pub async fn flip(
        &self,
        player: &PlayerId,
        pos: Position,
    ) -> Result<FlipOutcome, FlipError> {
        self.flip_until(player, pos, None, std::future::pending()).await
    }

    /// Flips the card at `pos` for `player`.
    ///
    /// If the player holds no card this is a first flip: the previous turn is
    /// cleaned up, then the card is claimed, parking while another player
    /// controls it. Parking ends when `timeout` (measured from the call) runs
    /// out or `cancel` completes, and the waiter is withdrawn.
    ///
    /// If the player already holds a card this is a second flip, which never
    /// waits: a missing or controlled card ends the turn with an error and the
    /// first card is given up.
    pub async fn flip_until<C>(
        &self,
        player: &PlayerId,
        pos: Position,
        timeout: Option<Duration>,
        cancel: C,
    ) -> Result<FlipOutcome, FlipError>
    where
        C: Future<Output = ()>,
    {
        self.check_position(pos)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        tokio::pin!(cancel);

        let mut state = self.state.write().await;

        // the player's turn is re-read on every pass: requests sharing a token
        // may have moved it on while this one was parked
        loop {
            if let Some(first) = state.player_mut(player).holding() {
                let outcome = state.flip_second(player, first, pos);
                self.publish(&mut state);
                return outcome;
            }

            state.cleanup(player);

            match state.try_flip_first(player, pos) {
                FirstAttempt::Done(outcome) => {
                    self.publish(&mut state);
                    return outcome;
                }
                FirstAttempt::TurnInProgress => continue,
                FirstAttempt::Blocked => {}
            }

            let (ticket, wake) = state.waiters.register(pos);
            self.publish(&mut state);
            drop(state);
            debug!("Player {} waiting for card at {}", player, pos);

            let interrupted = tokio::select! {
                _ = wake => None,
                _ = elapsed(deadline) => Some(FlipError::TimedOut(pos)),
                _ = &mut cancel => Some(FlipError::Cancelled(pos)),
            };

            state = self.state.write().await;
            if let Some(err) = interrupted {
                state.waiters.forget(pos, ticket);
                debug!("Player {} stopped waiting: {}", player, err);
                return Err(err);
            }
        }
    }

    /// The board as `player` sees it. Registers the player on first contact.
    pub async fn inspect(&self, player: &PlayerId) -> BoardView {
        let state = self.state.read().await;
        if state.players.contains_key(player) {
            return self.view(&state, player);
        }
        drop(state);

        let mut state = self.state.write().await;
        state.player_mut(player);
        let state = state.downgrade();
        self.view(&state, player)
    }

    fn view(&self, state: &State, player: &PlayerId) -> BoardView {
        let spots = state.cards.iter().map(|card| card.spot_for(player)).collect();
        BoardView::new(self.rows, self.cols, spots)
            .expect("board always holds rows * cols cards")
    }

    /// Replaces the label `from` with `to` on every card in one atomic pass.
    ///
    /// Returns whether any card changed.
    pub async fn relabel(&self, from: &str, to: &str) -> Result<bool, LabelError> {
        if !is_valid_label(to) {
            return Err(LabelError(to.to_string()));
        }
        self.map_labels(|label| {
            if label == from {
                to.to_string()
            } else {
                label.to_string()
            }
        })
        .await
    }

    /// Applies `f` to every label on the board under the exclusive lock.
    ///
    /// `f` runs once per distinct label, so cards that matched before still
    /// match afterwards. Nothing changes if any new label is invalid.
    pub async fn map_labels<F>(&self, f: F) -> Result<bool, LabelError>
    where
        F: Fn(&str) -> String,
    {
        let mut state = self.state.write().await;

        let mut mapping: HashMap<String, String> = HashMap::new();
        for label in state.cards.iter().filter_map(Card::label) {
            if !mapping.contains_key(label) {
                let replacement = f(label);
                if !is_valid_label(&replacement) {
                    return Err(LabelError(replacement));
                }
                mapping.insert(label.to_string(), replacement);
            }
        }

        let mut changed = 0;
        for card in state.cards.iter_mut() {
            let Some(replacement) = card.label().and_then(|label| mapping.get(label)) else {
                continue;
            };
            if Some(replacement.as_str()) != card.label() {
                card.relabel(replacement.clone());
                changed += 1;
            }
        }

        if changed > 0 {
            info!("Relabelled {} cards", changed);
            state.dirty = true;
            self.publish(&mut state);
        }
        Ok(changed > 0)
    }

    /// Waits for the next board change after this call starts.
    ///
    /// Changes that happen before the call are not observed; overlapping
    /// changes wake the caller once.
    pub async fn await_change<C>(&self, timeout: Option<Duration>, cancel: C) -> ChangeOutcome
    where
        C: Future<Output = ()>,
    {
        let mut watcher = self.changes.subscribe();
        let deadline = timeout.map(|t| Instant::now() + t);

        tokio::select! {
            version = watcher.changed() => match version {
                Some(version) => ChangeOutcome::Changed(version),
                None => ChangeOutcome::Cancelled,
            },
            _ = elapsed(deadline) => ChangeOutcome::TimedOut,
            _ = cancel => ChangeOutcome::Cancelled,
        }
    }

    /// A watcher for callers that track versions across several waits.
    pub fn changes(&self) -> ChangeWatcher {
        self.changes.subscribe()
    }

    /// Number of visible changes so far.
    pub fn version(&self) -> u64 {
        self.changes.version()
    }

    /// Number of flips currently parked on `pos`.
    pub async fn waiting_on(&self, pos: Position) -> usize {
        self.state.read().await.waiters.waiting_on(pos)
    }

    /// Checks every card and player against the board invariants.
    pub async fn check_invariants(&self) -> Result<(), InvariantError> {
        self.state.read().await.check_invariants()
    }

    /// Human-readable grid with every value shown, for logs.
    pub async fn dump(&self) -> String {
        let state = self.state.read().await;
        let mut out = format!("Board {}x{}:\n", self.rows, self.cols);
        for row in state.cards.chunks(self.cols) {
            for card in row {
                let cell = match card.state() {
                    CardState::Removed => "[   ]".to_string(),
                    CardState::FaceDown => format!("[ {} ]", card.label().unwrap_or("?")),
                    _ => format!("[*{}*]", card.label().unwrap_or("?")),
                };
                out.push_str(&cell);
                out.push(' ');
            }
            out.push('\n');
        }
        out
    }
}

async fn elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Spot;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready};

    fn board(rows: usize, cols: usize, labels: &[&str]) -> Board {
        let labels = labels.iter().map(|l| l.to_string()).collect();
        Board::new(Layout::new(rows, cols, labels).unwrap())
    }

    fn player(name: &str) -> PlayerId {
        PlayerId::new(name).unwrap()
    }

    fn at(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    async fn spot(board: &Board, viewer: &PlayerId, pos: Position) -> Spot {
        board
            .inspect(viewer)
            .await
            .spot(pos.row, pos.col)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_flip_turns_card_up() {
        let board = board(2, 2, &["A", "B", "A", "B"]);
        let x = player("x");

        let outcome = board.flip(&x, at(0, 0)).await;
        assert_eq!(outcome, Ok(FlipOutcome::First { turned_up: true }));
        assert_eq!(spot(&board, &x, at(0, 0)).await, Spot::My("A".to_string()));
        assert_eq!(
            spot(&board, &player("y"), at(0, 0)).await,
            Spot::Up("A".to_string())
        );
        assert_eq!(board.version(), 1);
    }

    #[tokio::test]
    async fn test_invalid_position_rejected() {
        let board = board(2, 2, &["A", "B", "A", "B"]);
        let x = player("x");

        assert!(matches!(
            board.flip(&x, at(2, 0)).await,
            Err(FlipError::InvalidPosition { rows: 2, cols: 2, .. })
        ));
        assert!(matches!(
            board.flip(&x, at(0, 5)).await,
            Err(FlipError::InvalidPosition { .. })
        ));
        assert_eq!(board.version(), 0);
    }

    #[tokio::test]
    async fn test_match_then_cleanup_removes_pair() {
        let board = board(2, 2, &["A", "B", "A", "B"]);
        let x = player("x");

        board.flip(&x, at(0, 0)).await.unwrap();
        assert_eq!(board.flip(&x, at(1, 0)).await, Ok(FlipOutcome::Matched));
        assert_eq!(spot(&board, &x, at(0, 0)).await, Spot::My("A".to_string()));
        assert_eq!(spot(&board, &x, at(1, 0)).await, Spot::My("A".to_string()));

        let outcome = board.flip(&x, at(0, 1)).await;
        assert_eq!(outcome, Ok(FlipOutcome::First { turned_up: true }));

        let view = board.inspect(&x).await;
        assert_eq!(view.spot(0, 0), Some(&Spot::None));
        assert_eq!(view.spot(1, 0), Some(&Spot::None));
        assert_eq!(view.spot(0, 1), Some(&Spot::My("B".to_string())));
        assert_eq!(view.remaining(), 2);
        board.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatch_leaves_cards_up_and_free() {
        let board = board(2, 2, &["A", "B", "C", "D"]);
        let x = player("x");
        let y = player("y");

        board.flip(&x, at(0, 0)).await.unwrap();
        assert_eq!(board.flip(&x, at(0, 1)).await, Ok(FlipOutcome::Mismatched));
        assert_eq!(spot(&board, &x, at(0, 0)).await, Spot::Up("A".to_string()));
        assert_eq!(spot(&board, &x, at(0, 1)).await, Spot::Up("B".to_string()));

        // a face-up free card is claimed without turning
        let outcome = board.flip(&y, at(0, 0)).await;
        assert_eq!(outcome, Ok(FlipOutcome::First { turned_up: false }));

        board.flip(&x, at(1, 0)).await.unwrap();
        let view = board.inspect(&x).await;
        assert_eq!(view.spot(0, 0), Some(&Spot::Up("A".to_string())));
        assert_eq!(view.spot(0, 1), Some(&Spot::Down));
        assert_eq!(view.spot(1, 0), Some(&Spot::My("C".to_string())));
        assert_eq!(spot(&board, &y, at(0, 0)).await, Spot::My("A".to_string()));
    }

    #[tokio::test]
    async fn test_first_flip_on_removed_card() {
        let board = board(1, 3, &["A", "A", "B"]);
        let x = player("x");
        board.flip(&x, at(0, 0)).await.unwrap();
        board.flip(&x, at(0, 1)).await.unwrap();
        board.flip(&x, at(0, 2)).await.unwrap();

        let y = player("y");
        assert_eq!(board.flip(&y, at(0, 0)).await, Err(FlipError::NoCard(at(0, 0))));
        assert_eq!(spot(&board, &y, at(0, 0)).await, Spot::None);
    }

    #[tokio::test]
    async fn test_second_flip_on_removed_card_releases_first() {
        let board = board(2, 2, &["A", "A", "B", "C"]);
        let x = player("x");
        let y = player("y");

        board.flip(&x, at(0, 0)).await.unwrap();
        board.flip(&x, at(0, 1)).await.unwrap();
        board.flip(&y, at(1, 0)).await.unwrap();
        // x's cleanup removes the pair while y holds (1, 0)
        board.flip(&x, at(1, 1)).await.unwrap();
        board.flip(&x, at(0, 0)).await.unwrap_err();

        assert_eq!(
            board.flip(&y, at(0, 0)).await,
            Err(FlipError::NoCard(at(0, 0)))
        );
        assert_eq!(spot(&board, &y, at(1, 0)).await, Spot::Up("B".to_string()));
        board.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_flip_on_controlled_card_does_not_block() {
        let board = board(2, 2, &["A", "B", "C", "D"]);
        let x = player("x");
        let y = player("y");

        board.flip(&x, at(0, 0)).await.unwrap();
        board.flip(&y, at(0, 1)).await.unwrap();

        assert_eq!(
            board.flip(&x, at(0, 1)).await,
            Err(FlipError::Controlled(at(0, 1)))
        );
        assert_eq!(spot(&board, &x, at(0, 0)).await, Spot::Up("A".to_string()));
        assert_eq!(spot(&board, &y, at(0, 1)).await, Spot::My("B".to_string()));

        // the given-up card goes face down when x starts again
        board.flip(&x, at(1, 1)).await.unwrap();
        assert_eq!(spot(&board, &x, at(0, 0)).await, Spot::Down);
    }

    #[tokio::test]
    async fn test_second_flip_on_own_card_matches_itself() {
        let board = board(1, 2, &["A", "B"]);
        let x = player("x");

        board.flip(&x, at(0, 0)).await.unwrap();
        assert_eq!(board.flip(&x, at(0, 0)).await, Ok(FlipOutcome::Matched));

        board.flip(&x, at(0, 1)).await.unwrap();
        let view = board.inspect(&x).await;
        assert_eq!(view.spot(0, 0), Some(&Spot::None));
        assert_eq!(view.spot(0, 1), Some(&Spot::My("B".to_string())));
        board.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_blocked_flip_resumes_after_release() {
        let board = board(2, 2, &["A", "B", "C", "D"]);
        let x = player("x");
        let y = player("y");
        board.flip(&x, at(0, 0)).await.unwrap();

        let mut waiting = tokio_test::task::spawn(board.flip(&y, at(0, 0)));
        assert_pending!(waiting.poll());
        assert_eq!(board.waiting_on(at(0, 0)).await, 1);

        assert_eq!(board.flip(&x, at(0, 1)).await, Ok(FlipOutcome::Mismatched));
        assert!(waiting.is_woken());

        let outcome = assert_ready!(waiting.poll());
        assert_eq!(outcome, Ok(FlipOutcome::First { turned_up: false }));
        assert_eq!(spot(&board, &y, at(0, 0)).await, Spot::My("A".to_string()));
        assert_eq!(board.waiting_on(at(0, 0)).await, 0);
    }

    #[tokio::test]
    async fn test_blocked_flip_sees_removed_card() {
        let board = board(2, 2, &["A", "B", "A", "B"]);
        let x = player("x");
        let y = player("y");
        board.flip(&x, at(0, 0)).await.unwrap();

        let mut waiting = tokio_test::task::spawn(board.flip(&y, at(0, 0)));
        assert_pending!(waiting.poll());

        // a match keeps (0, 0) controlled, so y keeps waiting
        assert_eq!(board.flip(&x, at(1, 0)).await, Ok(FlipOutcome::Matched));
        assert_pending!(waiting.poll());

        board.flip(&x, at(0, 1)).await.unwrap();
        assert!(waiting.is_woken());
        assert_eq!(
            assert_ready!(waiting.poll()),
            Err(FlipError::NoCard(at(0, 0)))
        );
    }

    #[tokio::test]
    async fn test_blocked_flip_times_out_and_withdraws() {
        let board = board(1, 2, &["A", "B"]);
        let x = player("x");
        let y = player("y");
        board.flip(&x, at(0, 0)).await.unwrap();

        let outcome = board
            .flip_until(&y, at(0, 0), Some(Duration::from_millis(20)), std::future::pending())
            .await;
        assert_eq!(outcome, Err(FlipError::TimedOut(at(0, 0))));
        assert_eq!(board.waiting_on(at(0, 0)).await, 0);
        assert_eq!(spot(&board, &x, at(0, 0)).await, Spot::My("A".to_string()));
    }

    #[tokio::test]
    async fn test_blocked_flip_cancelled() {
        let board = board(1, 2, &["A", "B"]);
        let x = player("x");
        let y = player("y");
        board.flip(&x, at(0, 0)).await.unwrap();

        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
        let cancel = async {
            let _ = cancel_rx.await;
        };
        let mut waiting = tokio_test::task::spawn(board.flip_until(&y, at(0, 0), None, cancel));
        assert_pending!(waiting.poll());

        cancel_tx.send(()).unwrap();
        assert_eq!(
            assert_ready!(waiting.poll()),
            Err(FlipError::Cancelled(at(0, 0)))
        );
        drop(waiting);
        assert_eq!(board.waiting_on(at(0, 0)).await, 0);
    }

    fn owned_by(board: &State, player: &PlayerId) -> Vec<Position> {
        (0..board.cards.len())
            .map(|i| Position::new(i / board.cols, i % board.cols))
            .filter(|pos| board.card(*pos).is_owned_by(player))
            .collect()
    }

    #[tokio::test]
    async fn test_woken_flip_becomes_second_flip_for_same_token() {
        let board = board(1, 3, &["A", "B", "C"]);
        let x = player("x");
        let y = player("y");
        board.flip(&y, at(0, 0)).await.unwrap();

        let mut parked = tokio_test::task::spawn(board.flip(&x, at(0, 0)));
        assert_pending!(parked.poll());

        // same token, second request: x takes (0, 1) while the first call waits
        board.flip(&x, at(0, 1)).await.unwrap();
        assert_eq!(board.flip(&y, at(0, 2)).await, Ok(FlipOutcome::Mismatched));
        assert!(parked.is_woken());

        assert_eq!(assert_ready!(parked.poll()), Ok(FlipOutcome::Mismatched));
        drop(parked);

        let state = board.state.read().await;
        assert!(owned_by(&state, &x).is_empty());
        assert_eq!(
            state.players[&x].turn(),
            Turn::Done {
                first: at(0, 1),
                second: at(0, 0),
                matched: false
            }
        );
        drop(state);
        board.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_woken_flip_cleans_up_turn_finished_meanwhile() {
        let board = board(1, 4, &["A", "B", "C", "D"]);
        let x = player("x");
        let y = player("y");
        board.flip(&y, at(0, 0)).await.unwrap();

        let mut parked = tokio_test::task::spawn(board.flip(&x, at(0, 0)));
        assert_pending!(parked.poll());

        board.flip(&x, at(0, 1)).await.unwrap();
        assert_eq!(board.flip(&x, at(0, 2)).await, Ok(FlipOutcome::Mismatched));
        board.flip(&y, at(0, 3)).await.unwrap();

        let outcome = assert_ready!(parked.poll());
        assert_eq!(outcome, Ok(FlipOutcome::First { turned_up: false }));
        drop(parked);

        let state = board.state.read().await;
        assert_eq!(owned_by(&state, &x), vec![at(0, 0)]);
        assert!(!state.card(at(0, 1)).is_face_up());
        assert!(!state.card(at(0, 2)).is_face_up());
        drop(state);
        board.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_invariants_catch_untracked_claim() {
        let board = board(1, 2, &["A", "B"]);
        let x = player("x");
        board.inspect(&x).await;

        let mut state = board.state.write().await;
        state.card_mut(at(0, 1)).turn_up();
        state.card_mut(at(0, 1)).claim(&x);
        assert_eq!(
            state.check_invariants(),
            Err(InvariantError::UntrackedClaim {
                player: "x".to_string(),
                position: at(0, 1)
            })
        );
    }

    #[tokio::test]
    async fn test_invariants_catch_too_many_claims() {
        let board = board(1, 3, &["A", "A", "A"]);
        let x = player("x");

        let mut state = board.state.write().await;
        for col in 0..3 {
            state.card_mut(at(0, col)).turn_up();
            state.card_mut(at(0, col)).claim(&x);
        }
        assert_eq!(
            state.check_invariants(),
            Err(InvariantError::TooManyClaims {
                player: "x".to_string(),
                count: 3
            })
        );
    }

    #[tokio::test]
    async fn test_dropped_flip_leaves_no_live_waiter() {
        let board = board(1, 2, &["A", "B"]);
        let x = player("x");
        let y = player("y");
        board.flip(&x, at(0, 0)).await.unwrap();

        let mut waiting = tokio_test::task::spawn(board.flip(&y, at(0, 0)));
        assert_pending!(waiting.poll());
        assert_eq!(board.waiting_on(at(0, 0)).await, 1);

        drop(waiting);
        assert_eq!(board.waiting_on(at(0, 0)).await, 0);

        // x can still finish its turn and y can flip normally afterwards
        assert_eq!(board.flip(&x, at(0, 1)).await, Ok(FlipOutcome::Mismatched));
        let outcome = board.flip(&y, at(0, 0)).await;
        assert_eq!(outcome, Ok(FlipOutcome::First { turned_up: false }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_flips_single_winner() {
        let board = Arc::new(board(1, 2, &["A", "B"]));
        let mut handles = Vec::new();

        for i in 0..8 {
            let board = Arc::clone(&board);
            handles.push(tokio::spawn(async move {
                let me = player(&format!("p{}", i));
                board
                    .flip_until(&me, at(0, 0), Some(Duration::from_millis(50)), std::future::pending())
                    .await
            }));
        }

        let mut claimed = 0;
        let mut timed_out = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(FlipOutcome::First { .. }) => claimed += 1,
                Err(FlipError::TimedOut(_)) => timed_out += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(claimed, 1);
        assert_eq!(timed_out, 7);
        assert_eq!(board.waiting_on(at(0, 0)).await, 0);
        board.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let board = board(2, 2, &["A", "B", "C", "D"]);
        let x = player("x");
        board.flip(&x, at(0, 0)).await.unwrap();
        board.flip(&x, at(0, 1)).await.unwrap();

        let mut state = board.state.write().await;
        state.cleanup(&x);
        let after_first: Vec<Card> = state.cards.clone();
        state.cleanup(&x);
        assert_eq!(state.cards, after_first);
        assert_eq!(state.players[&x].turn(), Turn::Idle);
        assert!(state.cards.iter().all(|c| !c.is_face_up()));
    }

    #[tokio::test]
    async fn test_player_never_holds_more_than_two() {
        let board = board(2, 3, &["A", "B", "C", "A", "B", "C"]);
        let x = player("x");
        for (row, col) in [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)] {
            let _ = board.flip(&x, at(row, col)).await;
            let state = board.state.read().await;
            let owned = state.cards.iter().filter(|c| c.is_owned_by(&x)).count();
            assert!(state.players[&x].pending().len() <= 2);
            assert!(owned <= 2);
        }
    }

    #[tokio::test]
    async fn test_inspect_registers_player() {
        let board = board(1, 1, &["A"]);
        let x = player("x");

        let view = board.inspect(&x).await;
        assert_eq!(view.to_string(), "1x1\ndown\n");
        assert!(board.state.read().await.players.contains_key(&x));
    }

    #[tokio::test]
    async fn test_relabel_round_trip() {
        let board = board(2, 2, &["A", "B", "A", "B"]);
        let x = player("x");
        board.flip(&x, at(0, 0)).await.unwrap();

        assert_eq!(board.relabel("A", "Z").await, Ok(true));
        assert_eq!(spot(&board, &x, at(0, 0)).await, Spot::My("Z".to_string()));
        assert_eq!(board.relabel("Q", "R").await, Ok(false));

        assert_eq!(board.relabel("Z", "A").await, Ok(true));
        let view = board.inspect(&x).await;
        assert_eq!(view.spot(0, 0), Some(&Spot::My("A".to_string())));
        assert_eq!(view.spot(1, 0), Some(&Spot::Down));

        // the relabelled pair still matches
        assert_eq!(board.flip(&x, at(1, 0)).await, Ok(FlipOutcome::Matched));
    }

    #[tokio::test]
    async fn test_relabel_rejects_invalid_label() {
        let board = board(1, 2, &["A", "B"]);
        let version = board.version();
        assert_eq!(
            board.relabel("A", "two words").await,
            Err(LabelError("two words".to_string()))
        );
        assert_eq!(board.relabel("A", "").await, Err(LabelError(String::new())));
        assert_eq!(
            board.relabel("missing", "bad label").await,
            Err(LabelError("bad label".to_string()))
        );
        assert_eq!(board.version(), version);
    }

    #[tokio::test]
    async fn test_map_labels_swaps_consistently() {
        let board = board(1, 4, &["A", "B", "A", "B"]);
        let swapped = board
            .map_labels(|label| match label {
                "A" => "B".to_string(),
                "B" => "A".to_string(),
                other => other.to_string(),
            })
            .await;
        assert_eq!(swapped, Ok(true));

        let mut state = board.state.write().await;
        for card in state.cards.iter_mut() {
            card.turn_up();
        }
        drop(state);
        let view = board.inspect(&player("x")).await;
        let labels: Vec<_> = view.spots().iter().filter_map(Spot::label).collect();
        assert_eq!(labels, ["B", "A", "B", "A"]);
    }

    #[tokio::test]
    async fn test_await_change_wakes_on_visible_change() {
        let board = board(1, 2, &["A", "B"]);
        let x = player("x");

        let mut watching =
            tokio_test::task::spawn(board.await_change(None, std::future::pending()));
        assert_pending!(watching.poll());

        board.flip(&x, at(0, 0)).await.unwrap();
        assert!(watching.is_woken());
        assert_eq!(assert_ready!(watching.poll()), ChangeOutcome::Changed(1));
    }

    #[tokio::test]
    async fn test_ownership_only_change_is_silent() {
        let board = board(1, 3, &["A", "B", "C"]);
        let x = player("x");
        let y = player("y");
        board.flip(&x, at(0, 0)).await.unwrap();
        board.flip(&x, at(0, 1)).await.unwrap();
        let version = board.version();

        let outcome = board.flip(&y, at(0, 0)).await;
        assert_eq!(outcome, Ok(FlipOutcome::First { turned_up: false }));
        assert_eq!(board.version(), version);
    }

    #[tokio::test]
    async fn test_await_change_times_out() {
        let board = board(1, 1, &["A"]);
        let outcome = board
            .await_change(Some(Duration::from_millis(10)), std::future::pending())
            .await;
        assert_eq!(outcome, ChangeOutcome::TimedOut);
        assert_eq!(board.changes.subscribers(), 0);
    }

    #[tokio::test]
    async fn test_await_change_cancelled() {
        let board = board(1, 1, &["A"]);
        let outcome = board.await_change(None, async {}).await;
        assert_eq!(outcome, ChangeOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_change_watcher_tracks_versions() {
        let board = board(1, 2, &["A", "B"]);
        let x = player("x");
        let mut watcher = board.changes();

        board.flip(&x, at(0, 0)).await.unwrap();
        board.flip(&x, at(0, 1)).await.unwrap();
        assert_eq!(watcher.changed().await, Some(2));

        board.relabel("A", "C").await.unwrap();
        assert_eq!(watcher.changed().await, Some(3));
    }

    #[tokio::test]
    async fn test_dump_shows_all_values() {
        let board = board(1, 2, &["A", "B"]);
        board.flip(&player("x"), at(0, 1)).await.unwrap();
        assert_eq!(board.dump().await, "Board 1x2:\n[ A ] [*B*] \n");
    }
}
