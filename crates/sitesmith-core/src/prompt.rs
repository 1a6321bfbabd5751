//! Message framing for the generation service.

use handlebars::Handlebars;
use serde_json::json;
use sitesmith_llm::Message;

use crate::error::SessionError;

const SYSTEM: &str = "You are an expert web developer. You turn a description of a website \
into the complete set of files that implement it, plus any shell commands needed to run it.

Answer with exactly one artifact and nothing else:

<artifact>
  <action type=\"file\" path=\"index.html\">...full file content...</action>
  <action type=\"shell\">...command...</action>
</artifact>

Every file action carries the full content of the file; paths are relative to the project root. \
The project is served as static files, so start from index.html.";

const INITIAL: &str = "Build this website: {{prompt}}";

const FOLLOW_UP: &str = "Apply this change to the website: {{prompt}}

{{#if files}}The project currently contains:
{{#each files}}- {{this}}
{{/each}}
{{/if}}Answer with one <artifact> holding an <action type=\"file\" path=\"...\"> for every file you \
create or change, with its full new content. Files you do not mention are kept as they are.";

/// Renders the system message and the user turn for each request.
pub struct PromptBuilder {
    registry: Handlebars<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, SessionError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        for (name, template) in [("initial", INITIAL), ("follow_up", FOLLOW_UP)] {
            registry
                .register_template_string(name, template)
                .map_err(|e| SessionError::Prompt(e.to_string()))?;
        }
        Ok(Self { registry })
    }

    pub fn system(&self) -> Message {
        Message::system(SYSTEM)
    }

    /// The user message for a turn. `files` is empty on the first turn.
    pub fn user_turn(&self, prompt: &str, files: &[&str]) -> Result<Message, SessionError> {
        let (template, data) = if files.is_empty() {
            ("initial", json!({ "prompt": prompt }))
        } else {
            ("follow_up", json!({ "prompt": prompt, "files": files }))
        };
        let text = self
            .registry
            .render(template, &data)
            .map_err(|e| SessionError::Prompt(e.to_string()))?;
        Ok(Message::user(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_turn_only_restates_the_prompt() {
        let prompts = PromptBuilder::new().unwrap();
        let msg = prompts.user_turn("a bakery <homepage>", &[]).unwrap();
        assert_eq!(msg.content, "Build this website: a bakery <homepage>");
    }

    #[test]
    fn follow_up_lists_current_files() {
        let prompts = PromptBuilder::new().unwrap();
        let msg = prompts
            .user_turn("add a menu page", &["index.html", "css/site.css"])
            .unwrap();
        assert!(msg.content.starts_with("Apply this change to the website: add a menu page"));
        assert!(msg.content.contains("- index.html\n- css/site.css\n"));
        assert!(msg.content.contains("<action type=\"file\""));
    }

    #[test]
    fn system_message_describes_the_artifact_format() {
        let prompts = PromptBuilder::new().unwrap();
        let system = prompts.system();
        assert!(system.content.contains("<artifact>"));
        assert!(system.content.contains("type=\"shell\""));
    }
}
