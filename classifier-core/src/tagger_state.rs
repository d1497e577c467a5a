//! Tagger lifecycle state.

use serde::{Deserialize, Serialize};

/// Where a [`crate::TaggerError`] or the tagger cache's bookkeeping
/// found a tagger. `Loaded -> Trained -> Precomputed` is the only legal
/// path; a tagger never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaggerState {
    /// Has examples but no pools or clues.
    Loaded,
    /// Has positive/negative pools but no clues.
    Trained,
    /// Has clues; pools have been released. Terminal.
    Precomputed,
}

impl TaggerState {
    /// Whether `next` is a legal direct successor of `self`.
    pub fn can_advance_to(self, next: TaggerState) -> bool {
        matches!(
            (self, next),
            (TaggerState::Loaded, TaggerState::Trained)
                | (TaggerState::Trained, TaggerState::Precomputed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_advances_only_to_trained() {
        assert!(TaggerState::Loaded.can_advance_to(TaggerState::Trained));
        assert!(!TaggerState::Loaded.can_advance_to(TaggerState::Precomputed));
    }

    #[test]
    fn precomputed_cannot_advance_further() {
        assert!(!TaggerState::Precomputed.can_advance_to(TaggerState::Loaded));
        assert!(!TaggerState::Precomputed.can_advance_to(TaggerState::Trained));
        assert!(!TaggerState::Precomputed.can_advance_to(TaggerState::Precomputed));
    }

    #[test]
    fn never_moves_backward() {
        assert!(!TaggerState::Trained.can_advance_to(TaggerState::Loaded));
    }
}
