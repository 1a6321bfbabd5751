use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::error::SandboxError;
use crate::mount::{MountEntry, MountTree};
use crate::sandbox::{CommandLine, PreviewEndpoint, Sandbox, SandboxProcess};

/// A [`Sandbox`] backed by a directory on the host.
///
/// Processes run with the directory as their working directory. The first
/// `http(s)://host:port` URL the latest server process prints is taken as
/// the server-ready signal.
pub struct LocalSandbox {
    root: PathBuf,
    ready: Arc<watch::Sender<Option<PreviewEndpoint>>>,
    url_pattern: Regex,
}

impl LocalSandbox {
    /// Create the root directory if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let url_pattern =
            Regex::new(r"(https?)://(\[[0-9a-fA-F:]+\]|[A-Za-z0-9.-]+):(\d{2,5})")
                .map_err(|e| SandboxError::Other(e.to_string()))?;
        let (ready, _) = watch::channel(None);
        Ok(Self {
            root,
            ready: Arc::new(ready),
            url_pattern,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl Sandbox for LocalSandbox {
    async fn mount(&self, tree: &MountTree) -> Result<(), SandboxError> {
        let mut entries = Vec::new();
        flatten(tree, &self.root, &mut entries)?;

        for (path, contents) in entries {
            match contents {
                None => tokio::fs::create_dir_all(&path).await?,
                Some(contents) => {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&path, contents).await?;
                }
            }
        }
        Ok(())
    }

    async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        self.start(command, None)
    }

    async fn spawn_server(
        &self,
        command: &CommandLine,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        self.ready.send_replace(None);
        self.start(command, Some(Arc::clone(&self.ready)))
    }

    async fn server_ready(&self) -> Result<PreviewEndpoint, SandboxError> {
        let mut rx = self.ready.subscribe();
        let endpoint = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SandboxError::Closed("local sandbox dropped".into()))?;
        endpoint
            .clone()
            .ok_or_else(|| SandboxError::Closed("ready signal was cleared".into()))
    }
}

type ReadySender = Arc<watch::Sender<Option<PreviewEndpoint>>>;

impl LocalSandbox {
    /// Spawn `command`. Its output is scanned for a URL only when `ready` is set.
    fn start(
        &self,
        command: &CommandLine,
        ready: Option<ReadySender>,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let label = command.to_string();
        if let Some(stdout) = child.stdout.take() {
            self.watch_output(stdout, label.clone(), ready.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            self.watch_output(stderr, label, ready);
        }

        Ok(Box::new(LocalProcess { child }))
    }

    fn watch_output<R>(&self, stream: R, label: String, ready: Option<ReadySender>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pattern = self.url_pattern.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(process = %label, "{line}");
                let Some(ready) = &ready else {
                    continue;
                };
                if let Some(endpoint) = detect_endpoint(&pattern, &line) {
                    ready.send_if_modified(|current| {
                        if current.is_some() {
                            return false;
                        }
                        tracing::info!(url = %endpoint.url, "server listening");
                        *current = Some(endpoint);
                        true
                    });
                }
            }
        });
    }
}

struct LocalProcess {
    child: Child,
}

#[async_trait::async_trait]
impl SandboxProcess for LocalProcess {
    async fn exit(&mut self) -> Result<i32, SandboxError> {
        let status = self.child.wait().await?;
        // Killed by a signal.
        Ok(status.code().unwrap_or(-1))
    }
}

/// Depth-first list of (path, contents); `None` contents mark a directory.
fn flatten(
    tree: &MountTree,
    dir: &Path,
    out: &mut Vec<(PathBuf, Option<String>)>,
) -> Result<(), SandboxError> {
    for (name, entry) in tree {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(SandboxError::Other(format!("unsafe entry name: {name:?}")));
        }
        let path = dir.join(name);
        match entry {
            MountEntry::Directory(children) => {
                out.push((path.clone(), None));
                flatten(children, &path, out)?;
            }
            MountEntry::File { contents } => out.push((path, Some(contents.clone()))),
        }
    }
    Ok(())
}

fn detect_endpoint(pattern: &Regex, line: &str) -> Option<PreviewEndpoint> {
    let caps = pattern.captures(line)?;
    let scheme = caps.get(1)?.as_str();
    let host = match caps.get(2)?.as_str() {
        "0.0.0.0" | "[::]" => "localhost",
        other => other,
    };
    let port: u16 = caps.get(3)?.as_str().parse().ok()?;
    Some(PreviewEndpoint {
        port,
        url: format!("{scheme}://{host}:{port}"),
    })
}
