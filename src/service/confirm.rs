//! Confirmation for destructive commands.

use crate::protocol::FileName;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// What the user is being asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", content = "name", rename_all = "snake_case")]
pub enum DeletePrompt {
    All,
    One(FileName),
}

impl fmt::Display for DeletePrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "Delete every log file on the meter? This cannot be undone."),
            Self::One(name) => write!(f, "Delete `{name}` from the meter? This cannot be undone."),
        }
    }
}

/// Asks the user before the device is touched.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &DeletePrompt) -> bool;
}

/// Answers every prompt the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl Confirm for FixedAnswer {
    async fn confirm(&self, _prompt: &DeletePrompt) -> bool {
        self.0
    }
}
