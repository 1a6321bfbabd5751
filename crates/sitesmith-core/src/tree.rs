//! The in-memory project: a forest of files and folders, built up
//! incrementally from [`Step`]s.
//!
//! Paths are `/`-separated and stored without a leading slash. Every node's
//! path is unique and every folder on the way to a node exists.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::artifact::{Step, StepKind, StepStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub body: NodeBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeBody {
    File { content: String },
    Folder { children: Vec<FileNode> },
}

impl FileNode {
    fn folder(name: &str, path: String) -> Self {
        Self {
            name: name.to_string(),
            path,
            body: NodeBody::Folder {
                children: Vec::new(),
            },
        }
    }

    fn file(name: &str, path: String, content: String) -> Self {
        Self {
            name: name.to_string(),
            path,
            body: NodeBody::File { content },
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.body, NodeBody::Folder { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match &self.body {
            NodeBody::File { content } => Some(content),
            NodeBody::Folder { .. } => None,
        }
    }

    pub fn children(&self) -> &[FileNode] {
        match &self.body {
            NodeBody::Folder { children } => children,
            NodeBody::File { .. } => &[],
        }
    }
}

/// Why a step was left pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No usable segments, or a `..` segment.
    InvalidPath,
    /// The path or one of its prefixes already exists with the other kind.
    KindCollision { at: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InvalidPath => f.write_str("invalid path"),
            Rejection::KindCollision { at } => {
                write!(f, "`{at}` already exists as the other kind of node")
            }
        }
    }
}

/// Result of applying one turn's steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Steps that transitioned to completed, in order.
    pub completed: Vec<u64>,
    /// Steps left pending, with the reason.
    pub rejected: Vec<(u64, Rejection)>,
    /// Command text of completed RunCommand steps, in order.
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceTree {
    roots: Vec<FileNode>,
}

impl WorkspaceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn roots(&self) -> &[FileNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Apply the pending steps in order and mark the applied ones completed.
    ///
    /// Steps are applied to a working copy which replaces `self` only after
    /// the whole batch has run, and statuses change in one pass at the end.
    pub fn apply(&mut self, steps: &mut [Step]) -> ApplyOutcome {
        let mut working = self.roots.clone();
        let mut outcome = ApplyOutcome::default();
        let mut applied = Vec::new();

        for (index, step) in steps.iter().enumerate().filter(|(_, s)| s.is_pending()) {
            match step.kind {
                StepKind::RunCommand => {
                    applied.push(index);
                    outcome.completed.push(step.id);
                    outcome.commands.push(step.content.clone());
                }
                StepKind::CreateFile => {
                    let path = step.path.as_deref().unwrap_or("");
                    match write_file(&mut working, path, &step.content) {
                        Ok(()) => {
                            applied.push(index);
                            outcome.completed.push(step.id);
                        }
                        Err(reason) => {
                            tracing::warn!(step = step.id, path, ?reason, "step rejected");
                            outcome.rejected.push((step.id, reason));
                        }
                    }
                }
            }
        }

        self.roots = working;
        for index in applied {
            steps[index].status = StepStatus::Completed;
        }
        outcome
    }

    /// Look up a node by path.
    pub fn get(&self, path: &str) -> Option<&FileNode> {
        let segments = segments(path).ok()?;
        let mut level = self.roots.as_slice();
        let mut found = None;
        for seg in segments {
            let node = level.iter().find(|n| n.name == seg)?;
            level = node.children();
            found = Some(node);
        }
        found
    }

    /// All file paths, depth first in insertion order.
    pub fn files(&self) -> Vec<&str> {
        fn walk<'a>(nodes: &'a [FileNode], out: &mut Vec<&'a str>) {
            for node in nodes {
                match &node.body {
                    NodeBody::File { .. } => out.push(&node.path),
                    NodeBody::Folder { children } => walk(children, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.roots, &mut out);
        out
    }

    /// Total node count, folders included.
    pub fn len(&self) -> usize {
        fn count(nodes: &[FileNode]) -> usize {
            nodes.iter().map(|n| 1 + count(n.children())).sum()
        }
        count(&self.roots)
    }
}

/// Functional form of [`WorkspaceTree::apply`]: returns the new tree and
/// the newly completed ids, leaving the inputs untouched.
pub fn apply(tree: &WorkspaceTree, steps: &[Step]) -> (WorkspaceTree, Vec<u64>) {
    let mut next = tree.clone();
    let mut steps = steps.to_vec();
    let outcome = next.apply(&mut steps);
    (next, outcome.completed)
}

fn segments(path: &str) -> Result<Vec<&str>, Rejection> {
    let segs: Vec<&str> = path
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segs.is_empty() || segs.contains(&"..") {
        return Err(Rejection::InvalidPath);
    }
    Ok(segs)
}

fn write_file(roots: &mut Vec<FileNode>, path: &str, content: &str) -> Result<(), Rejection> {
    let segs = segments(path)?;
    check_kinds(roots, &segs)?;

    let (file_name, folders) = match segs.split_last() {
        Some(split) => split,
        None => return Err(Rejection::InvalidPath),
    };

    let mut level = roots;
    let mut prefix = String::new();
    for seg in folders {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(seg);

        let idx = match level.iter().position(|n| n.name == *seg) {
            Some(i) => i,
            None => {
                level.push(FileNode::folder(seg, prefix.clone()));
                level.len() - 1
            }
        };
        level = match &mut level[idx].body {
            NodeBody::Folder { children } => children,
            NodeBody::File { .. } => {
                return Err(Rejection::KindCollision { at: prefix });
            }
        };
    }

    let full = segs.join("/");
    match level.iter().position(|n| n.name == *file_name) {
        Some(i) => {
            level[i].body = NodeBody::File {
                content: content.to_string(),
            }
        }
        None => level.push(FileNode::file(file_name, full, content.to_string())),
    }
    Ok(())
}

/// Read-only pass so a colliding step creates no folders at all.
fn check_kinds(roots: &[FileNode], segs: &[&str]) -> Result<(), Rejection> {
    let mut level = roots;
    for (i, seg) in segs.iter().enumerate() {
        let Some(node) = level.iter().find(|n| n.name == *seg) else {
            return Ok(());
        };
        let is_last = i + 1 == segs.len();
        if node.is_folder() == is_last {
            return Err(Rejection::KindCollision {
                at: node.path.clone(),
            });
        }
        level = node.children();
    }
    Ok(())
}
