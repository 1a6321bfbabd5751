use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tree::{FileNode, NodeBody, WorkspaceTree};

/// Nested name-to-entry mapping the sandbox mounts at its project root.
pub type MountTree = BTreeMap<String, MountEntry>;

/// Serializes as `{"directory": {...}}` or `{"file": {"contents": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountEntry {
    Directory(MountTree),
    File { contents: String },
}

impl MountEntry {
    pub fn file(contents: impl Into<String>) -> Self {
        MountEntry::File {
            contents: contents.into(),
        }
    }
}

/// Name of the manifest file the preview server is started from.
pub const MANIFEST_NAME: &str = "package.json";

/// Project the tree into the sandbox mount format. Pure.
pub fn project(tree: &WorkspaceTree) -> MountTree {
    project_nodes(tree.roots())
}

fn project_nodes(nodes: &[FileNode]) -> MountTree {
    nodes
        .iter()
        .map(|node| {
            let entry = match &node.body {
                NodeBody::File { content } => MountEntry::file(content.clone()),
                NodeBody::Folder { children } => MountEntry::Directory(project_nodes(children)),
            };
            (node.name.clone(), entry)
        })
        .collect()
}

/// Minimal manifest that serves the project root as static files.
pub fn preview_manifest() -> String {
    let manifest = serde_json::json!({
        "name": "web-preview",
        "type": "module",
        "scripts": {
            "dev": "npx serve -l 3000"
        },
        "dependencies": {
            "serve": "^14.2.1"
        }
    });
    format!("{manifest:#}")
}

/// Insert the preview manifest at the root. A generated manifest is replaced
/// unless `preserve_existing` is set.
pub fn with_manifest(mut mount: MountTree, preserve_existing: bool) -> MountTree {
    let generated = matches!(mount.get(MANIFEST_NAME), Some(MountEntry::File { .. }));
    if generated && preserve_existing {
        return mount;
    }
    if generated {
        tracing::debug!("replacing generated {MANIFEST_NAME} with preview manifest");
    }
    mount.insert(MANIFEST_NAME.to_string(), MountEntry::file(preview_manifest()));
    mount
}
