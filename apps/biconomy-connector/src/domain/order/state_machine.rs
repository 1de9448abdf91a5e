//! Order State Machine
//!
//! Monotonic lifecycle: `Open → {Filled, Canceled, Failed}`. Terminal states
//! are absorbing. When two sources disagree on the terminal kind the first
//! one applied stays authoritative and the disagreement is reported as a
//! conflict for the caller to log.

use super::OrderState;

/// Result of proposing a state to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The proposed state replaces the current one.
    Applied,
    /// The proposed state equals the current one.
    Unchanged,
    /// `Open` proposed for an order that already reached a terminal state.
    Ignored,
    /// A different terminal state proposed for a terminal order.
    Conflict {
        /// State that stays in effect.
        kept: OrderState,
        /// State that was refused.
        refused: OrderState,
    },
}

impl Transition {
    /// Whether the tracker should store the proposed state.
    #[must_use]
    pub const fn changes_state(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Order lifecycle rules.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Check if moving from `from` to `to` is a real transition.
    #[must_use]
    pub const fn is_valid_transition(from: OrderState, to: OrderState) -> bool {
        matches!(
            (from, to),
            (
                OrderState::Open,
                OrderState::Filled | OrderState::Canceled | OrderState::Failed
            )
        )
    }

    /// Classify a proposed state against the current one.
    #[must_use]
    pub fn apply(current: OrderState, proposed: OrderState) -> Transition {
        if current == proposed {
            return Transition::Unchanged;
        }
        if Self::is_valid_transition(current, proposed) {
            return Transition::Applied;
        }
        if proposed == OrderState::Open {
            Transition::Ignored
        } else {
            Transition::Conflict {
                kept: current,
                refused: proposed,
            }
        }
    }
}
