//! A single cell of the board.

use crate::player::PlayerId;
use shared::Spot;

/// Lifecycle state of a card, borrowed from the card itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState<'a> {
    Removed,
    FaceDown,
    FaceUp,
    Owned(&'a PlayerId),
}

/// One grid cell: a label (or nothing, once removed), a face and an owner.
///
/// A removed card is never face up and never owned; an owned card is always
/// face up. Mutators keep both rules and check them in debug builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    label: Option<String>,
    face_up: bool,
    owner: Option<PlayerId>,
}

/// Card labels are non-empty and contain no whitespace.
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty() && !label.chars().any(char::is_whitespace)
}

impl Card {
    /// Creates a face-down, unowned card.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            face_up: false,
            owner: None,
        }
    }

    pub fn state(&self) -> CardState<'_> {
        match (&self.label, self.face_up, &self.owner) {
            (None, _, _) => CardState::Removed,
            (Some(_), false, _) => CardState::FaceDown,
            (Some(_), true, None) => CardState::FaceUp,
            (Some(_), true, Some(owner)) => CardState::Owned(owner),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn owner(&self) -> Option<&PlayerId> {
        self.owner.as_ref()
    }

    pub fn is_removed(&self) -> bool {
        self.label.is_none()
    }

    pub fn is_face_up(&self) -> bool {
        self.face_up
    }

    pub fn is_owned_by(&self, player: &PlayerId) -> bool {
        self.owner.as_ref() == Some(player)
    }

    /// Turns the card face up. Returns true if it was face down.
    pub fn turn_up(&mut self) -> bool {
        if self.is_removed() || self.face_up {
            return false;
        }
        self.face_up = true;
        self.check_rep();
        true
    }

    /// Gives `player` control of a face-up card.
    pub fn claim(&mut self, player: &PlayerId) {
        debug_assert!(self.face_up, "only face-up cards can be claimed");
        self.owner = Some(player.clone());
        self.check_rep();
    }

    /// Drops any owner. Returns true if the card was owned.
    pub fn release(&mut self) -> bool {
        self.owner.take().is_some()
    }

    /// Turns a face-up, unowned card face down. Returns true on change.
    pub fn turn_down_if_free(&mut self) -> bool {
        if self.state() != CardState::FaceUp {
            return false;
        }
        self.face_up = false;
        self.check_rep();
        true
    }

    /// Takes the card off the board for good.
    pub fn remove(&mut self) {
        self.label = None;
        self.face_up = false;
        self.owner = None;
    }

    /// Replaces the label of a card still on the board.
    pub fn relabel(&mut self, label: String) {
        if self.label.is_some() {
            self.label = Some(label);
        }
    }

    /// The card as `viewer` sees it.
    pub fn spot_for(&self, viewer: &PlayerId) -> Spot {
        match (self.state(), self.label()) {
            (CardState::Removed, _) | (_, None) => Spot::None,
            (CardState::FaceDown, _) => Spot::Down,
            (CardState::Owned(owner), Some(label)) if owner == viewer => {
                Spot::My(label.to_string())
            }
            (_, Some(label)) => Spot::Up(label.to_string()),
        }
    }

    /// Whether the card satisfies its representation invariant.
    pub fn is_consistent(&self) -> bool {
        let removed_ok = self.label.is_some() || (!self.face_up && self.owner.is_none());
        let owned_ok = self.owner.is_none() || self.face_up;
        removed_ok && owned_ok
    }

    fn check_rep(&self) {
        debug_assert!(self.is_consistent(), "card invariant broken: {:?}", self);
    }
}
