//! Context Lifecycle
//!
//! `pending -> executing -> {completed | failed | cancelled}`. A pending run
//! may be aborted straight to `failed` or `cancelled`; terminal states accept
//! no further transitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a workflow run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ContextState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is a legal transition.
    ///
    /// `executing -> executing` is legal and used for per-step progress.
    pub fn can_transition_to(&self, to: ContextState) -> bool {
        use ContextState::*;
        matches!(
            (self, to),
            (Pending, Executing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Executing, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the transition history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub from: ContextState,
    pub to: ContextState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}
