//! Status-transition validation shared by every document type.
//!
//! Each document declares its allowed transitions once as a static table;
//! guards that need document data stay with the engines.

use crate::error::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Table of allowed `(from, to)` status transitions.
pub struct StateMachine<S: 'static> {
    transitions: &'static [(S, S)],
}

impl<S: Copy + Eq + Debug> StateMachine<S> {
    pub const fn new(transitions: &'static [(S, S)]) -> Self {
        Self { transitions }
    }

    pub fn can(&self, from: S, to: S) -> bool {
        self.transitions.iter().any(|(f, t)| *f == from && *t == to)
    }

    /// Fails with `InvalidTransition` carrying both states.
    pub fn ensure(&self, from: S, to: S) -> Result<(), DomainError> {
        if self.can(from, to) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: format!("{:?}", from),
                to: format!("{:?}", to),
            })
        }
    }
}

/// Immutability marker stamped at a key lifecycle event (sign, approve).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lock {
    pub locked_at: DateTime<Utc>,
    pub locked_by: String,
}

impl Lock {
    pub fn new(locked_by: impl Into<String>) -> Self {
        Self {
            locked_at: Utc::now(),
            locked_by: locked_by.into(),
        }
    }
}

/// Prepend an audit entry to a notes field, keeping what was there.
pub fn prepend_note(notes: &mut Option<String>, entry: &str) {
    *notes = Some(match notes.take() {
        Some(prior) => format!("{}\n{}", entry, prior),
        None => entry.to_string(),
    });
}
