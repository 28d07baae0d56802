use chrono::{DateTime, Utc};
use cref_core::model::ExecutionKey;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupState::Succeeded => write!(f, "succeeded"),
            GroupState::Failed => write!(f, "failed"),
            GroupState::TimedOut => write!(f, "timed-out"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group_id: i64,
    pub execution_id: i64,
    pub provider: String,
    pub diagnostic: String,
    pub key: ExecutionKey,
    pub state: GroupState,
    /// Failure detail, present for infrastructure failures and non-zero
    /// diagnostic exits.
    pub detail: Option<String>,
}

/// What one `solve` call did. Producing a report means the session itself
/// completed; individual failed diagnostics are normal content here.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Groups selected into the session.
    pub selected: usize,
    /// Selected groups never dispatched before cancellation; they remain
    /// PENDING with no execution row.
    pub pending: usize,
    pub deadline_hit: bool,
    pub outcomes: Vec<GroupOutcome>,
}

impl SessionReport {
    pub fn count(&self, state: GroupState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(GroupState::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(GroupState::Failed)
    }

    pub fn timed_out(&self) -> usize {
        self.count(GroupState::TimedOut)
    }
}
