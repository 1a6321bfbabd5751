use std::sync::Arc;
use std::time::Duration;

use sitesmith_llm::Message;
use tokio::sync::mpsc;

use crate::artifact::{ArtifactParser, FencedBlockParser, LenientParser, Recovery, Step};
use crate::complexity::{budget_for, classify};
use crate::error::SessionError;
use crate::event::{SessionEvent, TurnOutcome};
use crate::generation::GenerationClient;
use crate::prompt::PromptBuilder;
use crate::sandbox::{PreviewEndpoint, SyncState, Synchronizer};
use crate::tree::WorkspaceTree;

// ---------------------------------------------------------------------------
// Session state (shared between handle and spawned turn)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SessionState {
    history: Vec<Message>,
    steps: Vec<Step>,
    tree: WorkspaceTree,
}

struct Inner {
    client: GenerationClient,
    parser: Box<dyn ArtifactParser>,
    /// Consulted when `parser` finds no container and no steps.
    fallback: Option<Box<dyn ArtifactParser>>,
    prompts: PromptBuilder,
    /// Held for the whole turn. At most one turn per session.
    flight: Arc<tokio::sync::Mutex<()>>,
    state: parking_lot::Mutex<SessionState>,
    sync: tokio::sync::Mutex<Synchronizer>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One user's website under construction: conversation history, step
/// ledger, workspace tree and the sandbox that previews it.
///
/// Each [`submit`](Session::submit) runs classify, generate, parse, apply
/// and sync in order on a spawned task.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Artifact parsing falls back to markdown code blocks.
    pub fn new(client: GenerationClient, synchronizer: Synchronizer) -> Result<Self, SessionError> {
        Self::with_parsers(
            client,
            synchronizer,
            Box::new(LenientParser),
            Some(Box::new(FencedBlockParser)),
        )
    }

    /// Use `parser` alone, with no fallback.
    pub fn with_parser(
        client: GenerationClient,
        synchronizer: Synchronizer,
        parser: impl ArtifactParser + 'static,
    ) -> Result<Self, SessionError> {
        Self::with_parsers(client, synchronizer, Box::new(parser), None)
    }

    pub fn with_parsers(
        client: GenerationClient,
        synchronizer: Synchronizer,
        parser: Box<dyn ArtifactParser>,
        fallback: Option<Box<dyn ArtifactParser>>,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                parser,
                fallback,
                prompts: PromptBuilder::new()?,
                flight: Arc::new(tokio::sync::Mutex::new(())),
                state: parking_lot::Mutex::new(SessionState::default()),
                sync: tokio::sync::Mutex::new(synchronizer),
            }),
        })
    }

    /// Start a turn. Fails with [`SessionError::Busy`] while another turn runs.
    ///
    /// Dropping the returned stream before generation finishes discards the
    /// generated text; the request itself is not cancelled.
    pub fn submit(&self, prompt: impl Into<String>) -> Result<TurnStream, SessionError> {
        let guard = Arc::clone(&self.inner.flight)
            .try_lock_owned()
            .map_err(|_| SessionError::Busy)?;

        let prompt = prompt.into();
        let (tx, rx) = mpsc::channel(64);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(error) = run_turn(&inner, prompt, &tx).await {
                tracing::warn!(%error, "turn failed");
                let _ = tx.send(SessionEvent::Error { error }).await;
            }
        });

        Ok(TurnStream { rx })
    }

    /// Re-mount the current tree without generating anything.
    pub async fn resync(&self) -> Result<PreviewEndpoint, SessionError> {
        let _guard = Arc::clone(&self.inner.flight)
            .try_lock_owned()
            .map_err(|_| SessionError::Busy)?;
        let tree = self.tree();
        let mut sync = self.inner.sync.lock().await;
        Ok(sync.sync(&tree, &[]).await?)
    }

    pub fn is_busy(&self) -> bool {
        self.inner.flight.try_lock().is_err()
    }

    pub fn tree(&self) -> WorkspaceTree {
        self.inner.state.lock().tree.clone()
    }

    /// Every step from every turn, in order.
    pub fn steps(&self) -> Vec<Step> {
        self.inner.state.lock().steps.clone()
    }

    /// User and assistant messages so far, without the system message.
    pub fn history(&self) -> Vec<Message> {
        self.inner.state.lock().history.clone()
    }

    pub async fn sync_state(&self) -> SyncState {
        self.inner.sync.lock().await.state()
    }
}

// ---------------------------------------------------------------------------
// TurnStream
// ---------------------------------------------------------------------------

/// The events of one turn. Drop it to stop waiting.
pub struct TurnStream {
    rx: mpsc::Receiver<SessionEvent>,
}

impl TurnStream {
    /// The next event, or `None` once the turn has ended.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Skip to the end of the turn. With a `timeout`, give up after that long
    /// with [`SessionError::SoftTimeout`].
    pub async fn finish(mut self, timeout: Option<Duration>) -> Result<TurnOutcome, SessionError> {
        let collect = async {
            while let Some(event) = self.rx.recv().await {
                match event {
                    SessionEvent::TurnComplete { outcome } => return Ok(*outcome),
                    SessionEvent::Error { error } => return Err(error),
                    _ => {}
                }
            }
            Err(SessionError::Interrupted)
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, collect)
                .await
                .unwrap_or(Err(SessionError::SoftTimeout(limit))),
            None => collect.await,
        }
    }
}

// ---------------------------------------------------------------------------
// Turn (runs in spawned task)
// ---------------------------------------------------------------------------

async fn emit(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    // The turn runs to completion whether or not anyone is listening.
    let _ = tx.send(event).await;
}

async fn run_turn(
    inner: &Inner,
    prompt: String,
    tx: &mpsc::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    emit(tx, SessionEvent::UserMessage { content: prompt.clone() }).await;

    let tier = classify(&prompt);
    let budget = budget_for(&prompt);
    tracing::info!(%tier, max_tokens = budget.max_tokens, "classified prompt");
    emit(tx, SessionEvent::Classified { tier, budget }).await;

    let (user, messages) = {
        let state = inner.state.lock();
        let files = state.tree.files();
        let user = inner.prompts.user_turn(&prompt, &files)?;
        let mut messages = Vec::with_capacity(state.history.len() + 2);
        messages.push(inner.prompts.system());
        messages.extend(state.history.iter().cloned());
        messages.push(user.clone());
        (user, messages)
    };

    let raw = inner.client.generate_with_budget(&messages, budget).await?;
    if tx.is_closed() {
        tracing::info!(len = raw.len(), "caller stopped waiting, discarding generation");
        return Ok(());
    }
    emit(tx, SessionEvent::Generated { len: raw.len() }).await;

    let mut report = inner.parser.parse(&raw);
    if report.is_empty() && report.recovery == Recovery::Synthesized {
        if let Some(fallback) = &inner.fallback {
            let alternate = fallback.parse(&raw);
            if !alternate.is_empty() {
                tracing::info!(
                    steps = alternate.steps.len(),
                    "no artifact found, using fallback parser"
                );
                report = alternate;
            }
        }
    }
    if report.is_empty() {
        emit(
            tx,
            SessionEvent::StepsParsed {
                steps: Vec::new(),
                recovery: report.recovery,
                skipped: report.skipped,
            },
        )
        .await;
        return Err(SessionError::NoChanges);
    }

    let (steps, applied, tree) = {
        let mut state = inner.state.lock();
        let base = state.steps.iter().map(|s| s.id).max().unwrap_or(0);
        let mut steps = report.steps;
        for step in &mut steps {
            step.id += base;
        }

        let applied = state.tree.apply(&mut steps);
        state.steps.extend(steps.iter().cloned());
        state.history.push(user);
        state.history.push(Message::assistant(raw));
        (steps, applied, state.tree.clone())
    };

    emit(
        tx,
        SessionEvent::StepsParsed {
            steps: steps.clone(),
            recovery: report.recovery,
            skipped: report.skipped,
        },
    )
    .await;
    emit(
        tx,
        SessionEvent::TreeUpdated {
            completed: applied.completed,
            rejected: applied.rejected,
            files: tree.files().len(),
        },
    )
    .await;

    let result = {
        let mut sync = inner.sync.lock().await;
        sync.sync_observed(&tree, &applied.commands, &mut |state| {
            let _ = tx.try_send(SessionEvent::Sync(state));
        })
        .await
    };

    let (endpoint, sync_error) = match result {
        Ok(endpoint) => {
            emit(tx, SessionEvent::PreviewReady { url: endpoint.url.clone() }).await;
            (Some(endpoint), None)
        }
        Err(e) => {
            let cause = e.to_string();
            emit(tx, SessionEvent::SyncFailed { cause: cause.clone() }).await;
            (None, Some(cause))
        }
    };

    emit(
        tx,
        SessionEvent::TurnComplete {
            outcome: Box::new(TurnOutcome {
                tier,
                steps,
                endpoint,
                sync_error,
            }),
        },
    )
    .await;
    Ok(())
}
