use std::fmt;
use std::sync::Arc;

/// The generation client gave up.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Credentials or endpoint are structurally invalid. Never retried.
    #[error("generation service is misconfigured: {0}")]
    Configuration(#[source] sitesmith_llm::Error),

    /// Every attempt failed with a transient error.
    #[error("generation failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: sitesmith_llm::Error,
    },
}

/// Synchronizer stage whose process exited unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Install,
    Command,
    Start,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Install => "install",
            Stage::Command => "command",
            Stage::Start => "start",
        })
    }
}

/// Failure reported by a sandbox implementation.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The sandbox went away before the awaited signal arrived.
    #[error("sandbox closed: {0}")]
    Closed(String),

    #[error("{0}")]
    Other(String),
}

/// A sync attempt failed. Every variant renders a non-empty cause.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no sandbox is attached")]
    NoSandbox,

    #[error("mount failed: {0}")]
    Mount(#[source] SandboxError),

    #[error("{stage} process exited with code {code}: `{command}`")]
    Process {
        stage: Stage,
        command: String,
        code: i32,
    },

    #[error("could not spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: SandboxError,
    },

    #[error("preview server did not report ready within {0:?}")]
    ReadyTimeout(std::time::Duration),

    #[error("server ready signal failed: {0}")]
    Ready(#[source] SandboxError),
}

impl SyncError {
    /// Process exit code, where the failure came from one.
    pub fn code(&self) -> Option<i32> {
        match self {
            SyncError::Process { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors surfaced by a [`Session`](crate::Session) turn.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// A turn is already in flight for this session.
    #[error("a generation is already in progress")]
    Busy,

    #[error(transparent)]
    Generation(Arc<GenerationError>),

    #[error(transparent)]
    Sync(Arc<SyncError>),

    /// Generation succeeded but produced no usable steps.
    #[error("the response contained no usable changes")]
    NoChanges,

    #[error("could not render prompt: {0}")]
    Prompt(String),

    /// The caller stopped waiting. The turn may still complete in the background.
    #[error("gave up waiting after {0:?}")]
    SoftTimeout(std::time::Duration),

    /// The turn ended without reporting an outcome.
    #[error("turn ended without an outcome")]
    Interrupted,
}

impl From<GenerationError> for SessionError {
    fn from(e: GenerationError) -> Self {
        SessionError::Generation(Arc::new(e))
    }
}

impl From<SyncError> for SessionError {
    fn from(e: SyncError) -> Self {
        SessionError::Sync(Arc::new(e))
    }
}
