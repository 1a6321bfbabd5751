use crate::artifact::{Recovery, Step};
use crate::complexity::{Budget, ComplexityTier};
use crate::error::SessionError;
use crate::sandbox::{PreviewEndpoint, SyncState};
use crate::tree::Rejection;

/// What one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub tier: ComplexityTier,
    /// This turn's steps with ledger ids and final statuses.
    pub steps: Vec<Step>,
    /// Set when the preview came up.
    pub endpoint: Option<PreviewEndpoint>,
    /// Set when the sync failed. The tree keeps the turn's changes either way.
    pub sync_error: Option<String>,
}

/// Events emitted by a [`Session`](crate::Session) during one turn.
///
/// ```text
/// UserMessage
/// Classified
/// Generated
/// StepsParsed
/// TreeUpdated
/// (Sync)*
/// PreviewReady | SyncFailed
/// TurnComplete
/// ```
///
/// Any stage can end the turn early with `Error`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    UserMessage { content: String },

    Classified { tier: ComplexityTier, budget: Budget },

    /// Raw text arrived from the generation service.
    Generated { len: usize },

    StepsParsed {
        steps: Vec<Step>,
        recovery: Recovery,
        skipped: usize,
    },

    TreeUpdated {
        completed: Vec<u64>,
        rejected: Vec<(u64, Rejection)>,
        files: usize,
    },

    Sync(SyncState),

    PreviewReady { url: String },

    SyncFailed { cause: String },

    TurnComplete { outcome: Box<TurnOutcome> },

    Error { error: SessionError },
}
