use crate::report::GroupState;
use cref_core::model::ExecutionKey;

/// Progress events emitted during a solve session, consumed by the CLI for
/// live rendering. Dropped silently when no receiver is attached.
#[derive(Debug)]
pub enum SolverEvent {
    GroupsSynced {
        created: usize,
        flagged_unsatisfiable: usize,
        skipped_diagnostics: usize,
    },
    GroupsSelected {
        total: usize,
    },
    ExecutionStarted {
        provider: String,
        diagnostic: String,
        key: ExecutionKey,
        current: usize,
        total: usize,
    },
    ExecutionFinished {
        provider: String,
        diagnostic: String,
        key: ExecutionKey,
        state: GroupState,
    },
    DeadlineReached,
}
