pub mod artifact;
pub mod complexity;
pub mod error;
pub mod event;
pub mod generation;
pub mod local_sandbox;
pub mod mount;
pub mod prompt;
pub mod sandbox;
pub mod session;
pub mod tree;

pub use artifact::{
    ArtifactParser, FencedBlockParser, LenientParser, ParseReport, Recovery, Step, StepKind, StepStatus,
};
pub use complexity::{Budget, ComplexityTier, MAX_TOKENS_CEILING, budget_for, classify};
pub use error::{GenerationError, SandboxError, SessionError, Stage, SyncError};
pub use event::{SessionEvent, TurnOutcome};
pub use generation::{GenerationClient, GenerationConfig};
pub use local_sandbox::LocalSandbox;
pub use mount::{MountEntry, MountTree};
pub use sandbox::{
    CommandLine, PreviewEndpoint, Sandbox, SandboxProcess, SyncConfig, SyncState, Synchronizer,
};
pub use session::{Session, TurnStream};
pub use tree::{ApplyOutcome, FileNode, NodeBody, Rejection, WorkspaceTree};
