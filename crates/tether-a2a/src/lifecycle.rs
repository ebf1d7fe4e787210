//! Task lifecycle states and the legal transition table.
//!
//! Shared by the task store and the client runtime so both sides reject the
//! same moves.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::A2aError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub const ALL: [Self; 6] = [
        Self::Submitted,
        Self::Working,
        Self::InputRequired,
        Self::Completed,
        Self::Failed,
        Self::Canceled,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "inputRequired",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Terminal states are absorbing.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskState::{Canceled, Completed, Failed, InputRequired, Submitted, Working};

        matches!(
            (self, next),
            (Submitted, Working | Canceled | Failed)
                | (Working, InputRequired | Completed | Failed | Canceled)
                | (InputRequired, Working | Canceled | Failed)
        )
    }

    /// Validate a move and return the new state.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] if the move is not in the table.
    pub fn transition(self, next: Self) -> Result<Self, A2aError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(A2aError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
