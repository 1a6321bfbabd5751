//! Turns raw generated text into an ordered list of [`Step`]s.
//!
//! Parsing never fails. Malformed input degrades to the best recoverable
//! subset, which may be empty; the [`ParseReport`] says how much recovery
//! was needed.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CreateFile,
    RunCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
}

/// One unit of work extracted from an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: u64,
    pub kind: StepKind,
    pub title: String,
    /// Target path for [`StepKind::CreateFile`]. Always `None` for commands.
    pub path: Option<String>,
    /// File content or command text, trimmed.
    pub content: String,
    pub status: StepStatus,
}

impl Step {
    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }
}

/// How the container was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// The text was a clean container.
    None,
    /// Noise around the container was discarded.
    Trimmed,
    /// An opening tag was found with no closing tag; everything after it was used.
    Unterminated,
    /// No container at all; the whole text was treated as its body.
    Synthesized,
    /// No container at all; files were taken from markdown code blocks.
    Fenced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseReport {
    pub steps: Vec<Step>,
    pub recovery: Recovery,
    /// Actions that were found but could not become steps.
    pub skipped: usize,
}

impl ParseReport {
    fn empty(recovery: Recovery) -> Self {
        Self {
            steps: Vec::new(),
            recovery,
            skipped: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Strategy for turning generated text into steps.
pub trait ArtifactParser: Send + Sync {
    fn parse(&self, raw: &str) -> ParseReport;
}

/// Regex-scanning parser that accepts both tag dialects.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientParser;

impl ArtifactParser for LenientParser {
    fn parse(&self, raw: &str) -> ParseReport {
        let Some(patterns) = PATTERNS.as_ref() else {
            return ParseReport::empty(Recovery::Synthesized);
        };

        let (body, recovery) = locate_container(patterns, raw);
        if recovery != Recovery::None {
            tracing::warn!(?recovery, "artifact container was not clean");
        }

        let mut steps = Vec::new();
        let mut skipped = 0;
        for caps in patterns.action.captures_iter(body) {
            let attrs = parse_attributes(patterns, caps.get(1).map_or("", |m| m.as_str()));
            let inner = caps.get(2).map_or("", |m| m.as_str()).trim();

            let kind = match attrs.get("type").map(|t| t.to_ascii_lowercase()) {
                Some(t) if t == "file" => StepKind::CreateFile,
                Some(t) if t == "shell" || t == "command" => StepKind::RunCommand,
                other => {
                    tracing::warn!(action_type = ?other, "skipping action with unknown type");
                    skipped += 1;
                    continue;
                }
            };

            let path = match kind {
                StepKind::CreateFile => {
                    match attrs.get("path").or_else(|| attrs.get("filePath")) {
                        Some(p) if !p.trim().is_empty() => Some(p.trim().to_string()),
                        _ => {
                            tracing::warn!("skipping file action without a path");
                            skipped += 1;
                            continue;
                        }
                    }
                }
                StepKind::RunCommand => None,
            };

            let title = match &path {
                Some(p) => format!("Create {p}"),
                None => format!("Run {}", first_line(inner)),
            };

            steps.push(Step {
                id: steps.len() as u64 + 1,
                kind,
                title,
                path,
                content: inner.to_string(),
                status: StepStatus::Pending,
            });
        }

        tracing::debug!(steps = steps.len(), skipped, "parsed artifact");
        ParseReport {
            steps,
            recovery,
            skipped,
        }
    }
}

/// Parse with the default [`LenientParser`], dropping the report details.
pub fn parse(raw: &str) -> Vec<Step> {
    LenientParser.parse(raw).steps
}

/// Fallback for replies that ignore the artifact format and answer with
/// markdown code blocks instead.
///
/// A block whose first line is a `filename:` comment is written to that
/// path. Otherwise the first `html`, `css` and `js` blocks become
/// `index.html`, `style.css` and `script.js`. A bare `<!DOCTYPE html>`
/// document counts as `index.html` when no block claimed that path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FencedBlockParser;

impl ArtifactParser for FencedBlockParser {
    fn parse(&self, raw: &str) -> ParseReport {
        let Some(patterns) = FENCED.as_ref() else {
            return ParseReport::empty(Recovery::Fenced);
        };

        let mut files: Vec<(String, String)> = Vec::new();
        let mut skipped = 0;
        for caps in patterns.block.captures_iter(raw) {
            let lang = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
            let body = caps.get(2).map_or("", |m| m.as_str());

            let (path, content) = match annotated_path(patterns, body) {
                Some((path, rest)) => (path.to_string(), rest),
                None => match default_path(&lang) {
                    Some(path) if !files.iter().any(|(p, _)| p == path) => {
                        (path.to_string(), body)
                    }
                    _ => {
                        tracing::debug!(
                            lang = %lang,
                            "skipping code block without a target file"
                        );
                        skipped += 1;
                        continue;
                    }
                },
            };

            let content = content.trim();
            if content.is_empty() {
                skipped += 1;
                continue;
            }
            files.push((path, content.to_string()));
        }

        if !files.iter().any(|(p, _)| p == "index.html") {
            if let Some(doc) = patterns.document.find(raw) {
                files.insert(0, ("index.html".to_string(), doc.as_str().trim().to_string()));
            }
        }

        let steps: Vec<Step> = files
            .into_iter()
            .enumerate()
            .map(|(i, (path, content))| Step {
                id: i as u64 + 1,
                kind: StepKind::CreateFile,
                title: format!("Create {path}"),
                path: Some(path),
                content,
                status: StepStatus::Pending,
            })
            .collect();

        tracing::debug!(steps = steps.len(), skipped, "parsed fenced code blocks");
        ParseReport {
            steps,
            recovery: Recovery::Fenced,
            skipped,
        }
    }
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

struct Patterns {
    open: Regex,
    close_bolt: Regex,
    close_plain: Regex,
    action: Regex,
    attribute: Regex,
}

impl Patterns {
    fn build() -> Result<Self, regex::Error> {
        Ok(Self {
            open: Regex::new(r"<(boltArtifact|artifact)\b[^>]*>")?,
            close_bolt: Regex::new(r"</boltArtifact\s*>")?,
            close_plain: Regex::new(r"</artifact\s*>")?,
            action: Regex::new(
                r"(?s)<(?:boltAction|action)\b([^>]*)>(.*?)</(?:boltAction|action)\s*>",
            )?,
            attribute: Regex::new(r#"(\w+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
        })
    }
}

static PATTERNS: LazyLock<Option<Patterns>> = LazyLock::new(|| match Patterns::build() {
    Ok(p) => Some(p),
    Err(e) => {
        tracing::error!(error = %e, "artifact patterns failed to compile");
        None
    }
});

struct FencedPatterns {
    block: Regex,
    annotation: Regex,
    document: Regex,
}

impl FencedPatterns {
    fn build() -> Result<Self, regex::Error> {
        Ok(Self {
            block: Regex::new(r"(?s)```[ \t]*([\w+.-]*)[^\n]*\n(.*?)```")?,
            annotation: Regex::new(
                r"(?i)^\s*(?://|#|<!--|/\*)\s*(?:filename|file)\s*:\s*(\S+?)\s*(?:-->|\*/)?\s*$",
            )?,
            document: Regex::new(r"(?is)<!DOCTYPE html>.*?</html>")?,
        })
    }
}

static FENCED: LazyLock<Option<FencedPatterns>> = LazyLock::new(|| match FencedPatterns::build() {
    Ok(p) => Some(p),
    Err(e) => {
        tracing::error!(error = %e, "code block patterns failed to compile");
        None
    }
});

/// Find the container body: between the first opening tag and the first
/// closing tag of the same name after it.
fn locate_container<'a>(patterns: &Patterns, raw: &'a str) -> (&'a str, Recovery) {
    let Some(caps) = patterns.open.captures(raw) else {
        return (raw, Recovery::Synthesized);
    };
    let (Some(open), Some(name)) = (caps.get(0), caps.get(1)) else {
        return (raw, Recovery::Synthesized);
    };
    let close = match name.as_str() {
        "boltArtifact" => &patterns.close_bolt,
        _ => &patterns.close_plain,
    };
    let rest = &raw[open.end()..];
    match close.find(rest) {
        Some(close) => {
            let noisy = !raw[..open.start()].trim().is_empty()
                || !rest[close.end()..].trim().is_empty();
            let recovery = if noisy {
                Recovery::Trimmed
            } else {
                Recovery::None
            };
            (&rest[..close.start()], recovery)
        }
        None => (rest, Recovery::Unterminated),
    }
}

fn parse_attributes(patterns: &Patterns, raw: &str) -> HashMap<String, String> {
    patterns
        .attribute
        .captures_iter(raw)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_string();
            let value = c.get(2).or_else(|| c.get(3))?.as_str().to_string();
            Some((name, value))
        })
        .collect()
}

/// `// filename: src/app.js` style first line, split off from the rest.
fn annotated_path<'a>(patterns: &FencedPatterns, body: &'a str) -> Option<(&'a str, &'a str)> {
    let (first, rest) = body.split_once('\n').unwrap_or((body, ""));
    let path = patterns.annotation.captures(first)?.get(1)?.as_str();
    Some((path, rest))
}

fn default_path(lang: &str) -> Option<&'static str> {
    match lang {
        "html" | "htm" => Some("index.html"),
        "css" => Some("style.css"),
        "js" | "javascript" => Some("script.js"),
        _ => None,
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_action() {
        let steps = parse(r#"<artifact><action type="file" path="index.html"><h1>Hi</h1></action></artifact>"#);
        assert_eq!(
            steps,
            vec![Step {
                id: 1,
                kind: StepKind::CreateFile,
                title: "Create index.html".into(),
                path: Some("index.html".into()),
                content: "<h1>Hi</h1>".into(),
                status: StepStatus::Pending,
            }]
        );
    }

    #[test]
    fn minimal_artifact_yields_one_pending_step() {
        let steps = parse(r#"<artifact><action type="file" path="index.html">HI</action></artifact>"#);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, StepKind::CreateFile);
        assert_eq!(steps[0].path.as_deref(), Some("index.html"));
        assert_eq!(steps[0].content, "HI");
        assert_eq!(steps[0].status, StepStatus::Pending);
    }

    #[test]
    fn text_without_container_never_fails() {
        assert!(parse("no artifact here at all").is_empty());
        let report = LenientParser.parse("Sorry, I can't help with that.");
        assert!(report.is_empty());
        assert_eq!(report.recovery, Recovery::Synthesized);
        assert!(LenientParser.parse("").is_empty());
    }

    #[test]
    fn bare_actions_without_container_are_still_recovered() {
        let report = LenientParser
            .parse(r#"Here: <action type="shell">npm run build</action> done"#);
        assert_eq!(report.recovery, Recovery::Synthesized);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].kind, StepKind::RunCommand);
        assert_eq!(report.steps[0].title, "Run npm run build");
    }

    #[test]
    fn noise_around_container_is_discarded() {
        let raw = "Sure! Here is your site:\n```xml\n<artifact id=\"site\" title=\"Site\">\n<action type=\"file\" path=\"a.txt\">\n  one\n</action>\n</artifact>\n```\nEnjoy <action type=\"file\" path=\"b.txt\">x</action>";
        let report = LenientParser.parse(raw);
        assert_eq!(report.recovery, Recovery::Trimmed);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].content, "one");
    }

    #[test]
    fn unterminated_container_uses_the_tail() {
        let raw = r#"<artifact><action type="file" path="a.txt">a</action><action type="file" path="b.txt">b"#;
        let report = LenientParser.parse(raw);
        assert_eq!(report.recovery, Recovery::Unterminated);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].path.as_deref(), Some("a.txt"));
    }

    #[test]
    fn order_ids_and_dialects() {
        let raw = r#"<boltArtifact id="x">
<boltAction type="file" filePath="src/app.js">let a = 1;</boltAction>
<action path='index.html' type='file'>
<html></html>
</action>
<boltAction type="shell">npm install
npm start</boltAction>
<action type="command">ls</action>
</boltArtifact>"#;
        let report = LenientParser.parse(raw);
        assert_eq!(report.recovery, Recovery::None);
        let summary: Vec<_> = report
            .steps
            .iter()
            .map(|s| (s.id, s.kind, s.path.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, StepKind::CreateFile, Some("src/app.js")),
                (2, StepKind::CreateFile, Some("index.html")),
                (3, StepKind::RunCommand, None),
                (4, StepKind::RunCommand, None),
            ]
        );
        assert_eq!(report.steps[1].content, "<html></html>");
        assert_eq!(report.steps[2].content, "npm install\nnpm start");
        assert_eq!(report.steps[2].title, "Run npm install");
        assert!(report.steps.iter().all(Step::is_pending));
    }

    #[test]
    fn unusable_actions_are_skipped_without_gaps_in_ids() {
        let raw = r#"<artifact>
<action type="file">no path</action>
<action type="delete" path="x">?</action>
<action type="file" path="ok.txt">ok</action>
</artifact>"#;
        let report = LenientParser.parse(raw);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].id, 1);
    }

    #[test]
    fn closing_tag_must_match_the_opening_dialect() {
        let raw = r#"<artifact>
<action type="file" path="a.txt">a</action>
</boltArtifact>
<action type="file" path="b.txt">b</action>
</artifact>"#;
        let report = LenientParser.parse(raw);
        assert_eq!(report.recovery, Recovery::None);
        let paths: Vec<_> = report.steps.iter().filter_map(|s| s.path.as_deref()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);

        let bolt = LenientParser.parse(
            r#"<boltArtifact><boltAction type="file" filePath="x.txt">x</boltAction></artifact>"#,
        );
        assert_eq!(bolt.recovery, Recovery::Unterminated);
        assert_eq!(bolt.steps.len(), 1);
    }

    #[test]
    fn markdown_blocks_become_default_files() {
        let raw = "Here is your site:\n```html\n<!DOCTYPE html><html><body>Hi</body></html>\n```\n```css\nbody{color:red}\n```\n```javascript\nconsole.log(1);\n```\n```css\np{}\n```";
        assert!(LenientParser.parse(raw).is_empty());

        let report = FencedBlockParser.parse(raw);
        assert_eq!(report.recovery, Recovery::Fenced);
        assert_eq!(report.skipped, 1);
        let files: Vec<_> = report
            .steps
            .iter()
            .map(|s| (s.id, s.path.as_deref().unwrap_or(""), s.content.as_str()))
            .collect();
        assert_eq!(
            files,
            vec![
                (1, "index.html", "<!DOCTYPE html><html><body>Hi</body></html>"),
                (2, "style.css", "body{color:red}"),
                (3, "script.js", "console.log(1);"),
            ]
        );
        assert!(report.steps.iter().all(|s| s.kind == StepKind::CreateFile && s.is_pending()));
    }

    #[test]
    fn filename_comments_choose_the_path() {
        let raw = "```js\n// filename: backend/server.js\nconst app = express();\n```\n\n```css\n/* file: src/styles/main.css */\nh1{}\n```\n```html\n<!-- filename: about.html -->\n<p>About</p>\n```\n```python\nprint(1)\n```";
        let report = FencedBlockParser.parse(raw);
        let files: Vec<_> = report
            .steps
            .iter()
            .map(|s| (s.path.as_deref().unwrap_or(""), s.content.as_str()))
            .collect();
        assert_eq!(
            files,
            vec![
                ("backend/server.js", "const app = express();"),
                ("src/styles/main.css", "h1{}"),
                ("about.html", "<p>About</p>"),
            ]
        );
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn bare_document_becomes_index() {
        let raw = "Sure!\n<!DOCTYPE html>\n<html><body>Plain</body></html>\nThat's it.";
        let report = FencedBlockParser.parse(raw);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].path.as_deref(), Some("index.html"));
        assert_eq!(report.steps[0].content, "<!DOCTYPE html>\n<html><body>Plain</body></html>");
        assert!(FencedBlockParser.parse("no code here").is_empty());
    }

    #[test]
    fn empty_content_is_kept() {
        let steps = parse(r#"<artifact><action type="file" path="empty.txt">   </action></artifact>"#);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].content, "");
    }
}
