use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, Stage, SyncError};
use crate::mount::{self, MountTree};
use crate::tree::WorkspaceTree;

// ---------------------------------------------------------------------------
// Sandbox seam
// ---------------------------------------------------------------------------

/// An isolated environment that can hold a file tree and run processes in it.
#[async_trait::async_trait]
pub trait Sandbox: Send + Sync {
    /// Write the tree at the project root, overwriting files by path.
    async fn mount(&self, tree: &MountTree) -> Result<(), SandboxError>;

    /// Start a process in the project root. Does not wait for it.
    async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn SandboxProcess>, SandboxError>;

    /// Start the preview server. Only this process may satisfy
    /// [`server_ready`](Sandbox::server_ready).
    async fn spawn_server(
        &self,
        command: &CommandLine,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        self.spawn(command).await
    }

    /// Resolve once a server inside the sandbox is listening.
    async fn server_ready(&self) -> Result<PreviewEndpoint, SandboxError>;
}

/// A process running inside a [`Sandbox`].
#[async_trait::async_trait]
pub trait SandboxProcess: Send {
    /// Wait for the process to exit and return its exit code.
    async fn exit(&mut self) -> Result<i32, SandboxError>;
}

/// Program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split on whitespace. `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    /// Run `text` through `sh -c`, for command text that may use shell syntax.
    pub fn shell(text: &str) -> Self {
        Self::new("sh", ["-c", text])
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where the running preview can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewEndpoint {
    pub port: u16,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Uninitialized,
    Mounting,
    Installing,
    Starting,
    Ready,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::Mounting => "mounting",
            SyncState::Installing => "installing",
            SyncState::Starting => "starting",
            SyncState::Ready => "ready",
            SyncState::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub install_command: CommandLine,
    pub start_command: CommandLine,
    /// Give up waiting for the server after this long. `None` waits forever.
    pub ready_timeout: Option<Duration>,
    /// Forwarded commands still running after this are left in the background.
    pub command_timeout: Duration,
    /// Keep a generated `package.json` instead of the preview manifest.
    pub preserve_generated_manifest: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            install_command: CommandLine::new("npm", ["install"]),
            start_command: CommandLine::new("npm", ["run", "dev"]),
            ready_timeout: None,
            command_timeout: Duration::from_secs(60),
            preserve_generated_manifest: false,
        }
    }
}

/// Drives a sandbox from an empty state to a serving preview.
///
/// Every sync re-mounts the tree. Install and start run once per sandbox
/// lifetime; a failed stage is retried by the next sync.
pub struct Synchronizer {
    sandbox: Option<Arc<dyn Sandbox>>,
    config: SyncConfig,
    state: SyncState,
    installed: bool,
    server: Option<Box<dyn SandboxProcess>>,
    endpoint: Option<PreviewEndpoint>,
    background: Vec<Box<dyn SandboxProcess>>,
    last_error: Option<String>,
}

impl Synchronizer {
    pub fn new(sandbox: Option<Arc<dyn Sandbox>>, config: SyncConfig) -> Self {
        Self {
            sandbox,
            config,
            state: SyncState::Uninitialized,
            installed: false,
            server: None,
            endpoint: None,
            background: Vec::new(),
            last_error: None,
        }
    }

    /// Replace the sandbox. Install and start run again on the next sync.
    pub fn attach(&mut self, sandbox: Arc<dyn Sandbox>) {
        *self = Self::new(Some(sandbox), self.config.clone());
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&PreviewEndpoint> {
        self.endpoint.as_ref()
    }

    /// Cause of the most recent failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub async fn sync(
        &mut self,
        tree: &WorkspaceTree,
        commands: &[String],
    ) -> Result<PreviewEndpoint, SyncError> {
        self.sync_observed(tree, commands, &mut |_| {}).await
    }

    /// Like [`sync`](Self::sync), reporting each state transition to `observe`.
    pub async fn sync_observed(
        &mut self,
        tree: &WorkspaceTree,
        commands: &[String],
        observe: &mut (dyn FnMut(SyncState) + Send),
    ) -> Result<PreviewEndpoint, SyncError> {
        match self.run(tree, commands, observe).await {
            Ok(endpoint) => {
                self.last_error = None;
                self.endpoint = Some(endpoint.clone());
                self.transition(SyncState::Ready, observe);
                tracing::info!(url = %endpoint.url, "preview ready");
                Ok(endpoint)
            }
            Err(e) => {
                tracing::warn!(error = %e, "sync failed");
                self.last_error = Some(e.to_string());
                self.transition(SyncState::Failed, observe);
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        tree: &WorkspaceTree,
        commands: &[String],
        observe: &mut (dyn FnMut(SyncState) + Send),
    ) -> Result<PreviewEndpoint, SyncError> {
        let sandbox = self.sandbox.clone().ok_or(SyncError::NoSandbox)?;

        self.transition(SyncState::Mounting, observe);
        let projected = mount::with_manifest(
            mount::project(tree),
            self.config.preserve_generated_manifest,
        );
        sandbox.mount(&projected).await.map_err(SyncError::Mount)?;
        tracing::debug!(entries = projected.len(), "mounted tree");

        if !self.installed {
            self.transition(SyncState::Installing, observe);
            let install = self.config.install_command.clone();
            let code = run_to_exit(sandbox.as_ref(), &install).await?;
            if code != 0 {
                return Err(SyncError::Process {
                    stage: Stage::Install,
                    command: install.to_string(),
                    code,
                });
            }
            self.installed = true;
        }

        for text in commands {
            self.run_command(sandbox.as_ref(), text).await?;
        }

        if self.server.is_none() {
            self.transition(SyncState::Starting, observe);
            let start = &self.config.start_command;
            let process = sandbox.spawn_server(start).await.map_err(|source| SyncError::Spawn {
                command: start.to_string(),
                source,
            })?;
            self.server = Some(process);
        }

        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        self.await_ready(sandbox.as_ref()).await
    }

    async fn run_command(&mut self, sandbox: &dyn Sandbox, text: &str) -> Result<(), SyncError> {
        let command = CommandLine::shell(text);
        tracing::info!(command = text, "running command");
        let mut process = sandbox.spawn(&command).await.map_err(|source| SyncError::Spawn {
            command: text.to_string(),
            source,
        })?;

        match tokio::time::timeout(self.config.command_timeout, process.exit()).await {
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(code)) => Err(SyncError::Process {
                stage: Stage::Command,
                command: text.to_string(),
                code,
            }),
            Ok(Err(source)) => Err(SyncError::Spawn {
                command: text.to_string(),
                source,
            }),
            Err(_) => {
                tracing::info!(command = text, "command still running, leaving it in the background");
                self.reap_background().await;
                self.background.push(process);
                Ok(())
            }
        }
    }

    /// Drop background processes that have already exited.
    async fn reap_background(&mut self) {
        let mut running = Vec::with_capacity(self.background.len());
        for mut process in self.background.drain(..) {
            match tokio::time::timeout(Duration::ZERO, process.exit()).await {
                Ok(result) => tracing::debug!(?result, "background command exited"),
                Err(_) => running.push(process),
            }
        }
        self.background = running;
    }

    async fn await_ready(&mut self, sandbox: &dyn Sandbox) -> Result<PreviewEndpoint, SyncError> {
        let start = self.config.start_command.to_string();
        let server = &mut self.server;
        let wait = async {
            let Some(process) = server.as_mut() else {
                return sandbox.server_ready().await.map_err(SyncError::Ready);
            };
            tokio::select! {
                ready = sandbox.server_ready() => ready.map_err(SyncError::Ready),
                exited = process.exit() => Err(match exited {
                    Ok(code) => SyncError::Process { stage: Stage::Start, command: start.clone(), code },
                    Err(e) => SyncError::Ready(e),
                }),
            }
        };

        let result = match self.config.ready_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(SyncError::ReadyTimeout(limit))),
            None => wait.await,
        };

        if let Err(SyncError::Process { stage: Stage::Start, .. }) = &result {
            self.server = None;
        }

        let endpoint = result?;
        if endpoint.url.trim().is_empty() {
            return Err(SyncError::Ready(SandboxError::Other(
                "sandbox reported an empty preview url".into(),
            )));
        }
        Ok(endpoint)
    }

    fn transition(&mut self, next: SyncState, observe: &mut (dyn FnMut(SyncState) + Send)) {
        tracing::debug!(from = %self.state, to = %next, "sync state");
        self.state = next;
        observe(next);
    }
}

async fn run_to_exit(sandbox: &dyn Sandbox, command: &CommandLine) -> Result<i32, SyncError> {
    tracing::info!(%command, "running");
    let mut process = sandbox.spawn(command).await.map_err(|source| SyncError::Spawn {
        command: command.to_string(),
        source,
    })?;
    process.exit().await.map_err(|source| SyncError::Spawn {
        command: command.to_string(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifact::{Step, StepKind, StepStatus};
    use crate::mount::MountEntry;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory sandbox. Processes exit immediately with a scripted code,
    /// except the server, which runs until dropped.
    #[derive(Default)]
    pub(crate) struct FakeSandbox {
        pub mounts: Mutex<Vec<MountTree>>,
        pub spawned: Mutex<Vec<String>>,
        pub exit_codes: HashMap<String, i32>,
        pub hang: Vec<String>,
        /// Commands that exit with code 0 after the given delay.
        pub slow: HashMap<String, Duration>,
        pub url: String,
        pub fail_mount: bool,
    }

    impl FakeSandbox {
        pub(crate) fn serving(url: &str) -> Self {
            Self {
                url: url.to_string(),
                ..Default::default()
            }
        }

        pub(crate) fn spawned(&self) -> Vec<String> {
            self.spawned.lock().unwrap().clone()
        }
    }

    struct FakeProcess {
        code: Option<i32>,
        exits_at: Option<tokio::time::Instant>,
    }

    #[async_trait::async_trait]
    impl SandboxProcess for FakeProcess {
        async fn exit(&mut self) -> Result<i32, SandboxError> {
            if let Some(at) = self.exits_at {
                tokio::time::sleep_until(at).await;
            }
            match self.code {
                Some(code) => Ok(code),
                None => std::future::pending().await,
            }
        }
    }

    #[async_trait::async_trait]
    impl Sandbox for FakeSandbox {
        async fn mount(&self, tree: &MountTree) -> Result<(), SandboxError> {
            if self.fail_mount {
                return Err(SandboxError::Other("read-only filesystem".into()));
            }
            self.mounts.lock().unwrap().push(tree.clone());
            Ok(())
        }

        async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn SandboxProcess>, SandboxError> {
            let line = command.to_string();
            self.spawned.lock().unwrap().push(line.clone());
            let long_running = line == "npm run dev" || self.hang.contains(&line);
            let code = (!long_running).then(|| self.exit_codes.get(&line).copied().unwrap_or(0));
            let exits_at = self
                .slow
                .get(&line)
                .map(|delay| tokio::time::Instant::now() + *delay);
            Ok(Box::new(FakeProcess { code, exits_at }))
        }

        async fn server_ready(&self) -> Result<PreviewEndpoint, SandboxError> {
            Ok(PreviewEndpoint {
                port: 3000,
                url: self.url.clone(),
            })
        }
    }

    fn tree() -> WorkspaceTree {
        let mut tree = WorkspaceTree::new();
        tree.apply(&mut [Step {
            id: 1,
            kind: StepKind::CreateFile,
            title: String::new(),
            path: Some("index.html".into()),
            content: "<h1>Hi</h1>".into(),
            status: StepStatus::Pending,
        }]);
        tree
    }

    fn synchronizer(sandbox: &Arc<FakeSandbox>) -> Synchronizer {
        let sandbox: Arc<dyn Sandbox> = sandbox.clone();
        Synchronizer::new(Some(sandbox), SyncConfig::default())
    }

    #[tokio::test]
    async fn first_sync_walks_every_state_to_ready() {
        let sandbox = Arc::new(FakeSandbox::serving("http://localhost:3000"));
        let mut sync = synchronizer(&sandbox);

        let mut seen = Vec::new();
        let endpoint = sync
            .sync_observed(&tree(), &[], &mut |s| seen.push(s))
            .await
            .unwrap();

        assert_eq!(endpoint.url, "http://localhost:3000");
        assert_eq!(
            seen,
            vec![
                SyncState::Mounting,
                SyncState::Installing,
                SyncState::Starting,
                SyncState::Ready
            ]
        );
        assert_eq!(sandbox.spawned(), vec!["npm install", "npm run dev"]);

        let mounted = sandbox.mounts.lock().unwrap()[0].clone();
        assert!(matches!(mounted.get("index.html"), Some(MountEntry::File { .. })));
        assert!(mounted.contains_key(mount::MANIFEST_NAME));
    }

    #[tokio::test]
    async fn second_sync_remounts_without_reinstalling() {
        let sandbox = Arc::new(FakeSandbox::serving("http://localhost:3000"));
        let mut sync = synchronizer(&sandbox);

        sync.sync(&tree(), &[]).await.unwrap();
        let mut seen = Vec::new();
        sync.sync_observed(&tree(), &[], &mut |s| seen.push(s))
            .await
            .unwrap();

        assert_eq!(sandbox.mounts.lock().unwrap().len(), 2);
        assert_eq!(sandbox.spawned().len(), 2);
        assert_eq!(seen, vec![SyncState::Mounting, SyncState::Ready]);
    }

    #[tokio::test]
    async fn failed_install_reports_exit_code() {
        let sandbox = Arc::new(FakeSandbox {
            exit_codes: HashMap::from([("npm install".to_string(), 1)]),
            ..FakeSandbox::serving("http://localhost:3000")
        });
        let mut sync = synchronizer(&sandbox);

        let err = sync.sync(&tree(), &[]).await.unwrap_err();
        assert_eq!(err.code(), Some(1));
        assert_eq!(sync.state(), SyncState::Failed);
        assert!(!sync.last_error().unwrap().is_empty());
        assert_eq!(sandbox.spawned(), vec!["npm install"]);
    }

    #[tokio::test]
    async fn missing_sandbox_fails_with_cause() {
        let mut sync = Synchronizer::new(None, SyncConfig::default());
        let err = sync.sync(&tree(), &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::NoSandbox));
        assert_eq!(sync.state(), SyncState::Failed);
        assert!(!sync.last_error().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mount_failure_is_reported() {
        let sandbox = Arc::new(FakeSandbox {
            fail_mount: true,
            ..FakeSandbox::serving("http://localhost:3000")
        });
        let mut sync = synchronizer(&sandbox);
        let err = sync.sync(&tree(), &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Mount(_)));
        assert!(sync.last_error().unwrap().contains("read-only"));
    }

    #[tokio::test]
    async fn empty_url_is_not_ready() {
        let sandbox = Arc::new(FakeSandbox::serving(""));
        let mut sync = synchronizer(&sandbox);
        assert!(sync.sync(&tree(), &[]).await.is_err());
        assert_eq!(sync.state(), SyncState::Failed);
    }

    #[tokio::test]
    async fn forwarded_commands_run_after_install_before_start() {
        let sandbox = Arc::new(FakeSandbox::serving("http://localhost:3000"));
        let mut sync = synchronizer(&sandbox);

        sync.sync(&tree(), &["npm i lodash".to_string()]).await.unwrap();
        assert_eq!(
            sandbox.spawned(),
            vec!["npm install", "sh -c npm i lodash", "npm run dev"]
        );
    }

    #[tokio::test]
    async fn failing_command_fails_the_sync() {
        let sandbox = Arc::new(FakeSandbox {
            exit_codes: HashMap::from([("sh -c exit 3".to_string(), 3)]),
            ..FakeSandbox::serving("http://localhost:3000")
        });
        let mut sync = synchronizer(&sandbox);
        let err = sync.sync(&tree(), &["exit 3".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Process {
                stage: Stage::Command,
                code: 3,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn long_running_command_is_left_in_background() {
        let sandbox = Arc::new(FakeSandbox {
            hang: vec!["sh -c npx tailwindcss --watch".to_string()],
            ..FakeSandbox::serving("http://localhost:3000")
        });
        let mut sync = synchronizer(&sandbox);
        sync.sync(&tree(), &["npx tailwindcss --watch".to_string()])
            .await
            .unwrap();
        assert_eq!(sync.background.len(), 1);
        assert_eq!(sync.state(), SyncState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_background_commands_are_dropped() {
        let sandbox = Arc::new(FakeSandbox {
            slow: HashMap::from([("sh -c npm run build".to_string(), Duration::from_secs(90))]),
            hang: vec!["sh -c npx tailwindcss --watch".to_string()],
            ..FakeSandbox::serving("http://localhost:3000")
        });
        let mut sync = synchronizer(&sandbox);
        sync.sync(&tree(), &["npm run build".to_string()])
            .await
            .unwrap();
        assert_eq!(sync.background.len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        sync.sync(&tree(), &["npx tailwindcss --watch".to_string()])
            .await
            .unwrap();
        assert_eq!(sync.background.len(), 1);
    }

    #[tokio::test]
    async fn install_is_retried_after_failure() {
        let failing = Arc::new(FakeSandbox {
            exit_codes: HashMap::from([("npm install".to_string(), 1)]),
            ..FakeSandbox::serving("http://localhost:3000")
        });
        let mut sync = synchronizer(&failing);
        sync.sync(&tree(), &[]).await.unwrap_err();

        let healthy: Arc<dyn Sandbox> = Arc::new(FakeSandbox::serving("http://localhost:3000"));
        sync.attach(healthy);
        assert_eq!(sync.state(), SyncState::Uninitialized);
        assert!(sync.sync(&tree(), &[]).await.is_ok());
    }

    #[test]
    fn command_line_parsing() {
        assert_eq!(
            CommandLine::parse("  npm run dev "),
            Some(CommandLine::new("npm", ["run", "dev"]))
        );
        assert_eq!(CommandLine::parse("   "), None);
        assert_eq!(CommandLine::shell("ls -la").to_string(), "sh -c ls -la");
    }
}
