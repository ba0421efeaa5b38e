use std::collections::HashMap;
use std::fmt::Write;

use crate::chat::{ChatSender, ChatTurn};

pub struct TemplateEngine;

impl TemplateEngine {
    // Template embedded at compile time
    const PERSONA_PROMPT: &'static str = include_str!("../templates/persona_prompt.txt");

    /// Substitutes `{{NAME}}` placeholders in a single left-to-right pass.
    ///
    /// Substituted values are never scanned again, so user text that happens to
    /// look like a placeholder is left alone. Unknown placeholders are kept verbatim.
    #[must_use]
    pub fn render(
        template: &str,
        variables: &HashMap<&str, &str>,
    ) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];

            let Some(end) = after_open.find("}}") else {
                result.push_str(&rest[start..]);
                return result;
            };

            let key = &after_open[..end];
            match variables.get(key) {
                Some(value) => result.push_str(value),
                None => {
                    result.push_str("{{");
                    result.push_str(key);
                    result.push_str("}}");
                }
            }
            rest = &after_open[end + 2..];
        }

        result.push_str(rest);
        result
    }

    /// Renders the persona prompt.
    ///
    /// History turns are written as `User: ...` / `Agent: ...` lines in order,
    /// followed by the current message and an open `Agent:` cue for the model
    /// to complete.
    #[must_use]
    pub fn render_persona_prompt(
        audience_summary: &str,
        brand_context: &str,
        user_prompt: &str,
        history: &[ChatTurn],
    ) -> String {
        let conversation = Self::render_conversation(history, user_prompt);

        let mut variables = HashMap::new();
        variables.insert("AUDIENCE_SUMMARY", audience_summary);
        variables.insert("BRAND_CONTEXT", brand_context);
        variables.insert("CONVERSATION", conversation.as_str());

        Self::render(Self::PERSONA_PROMPT, &variables).trim_end().to_string()
    }

    fn render_conversation(
        history: &[ChatTurn],
        user_prompt: &str,
    ) -> String {
        let mut conversation = String::new();
        for turn in history {
            // Writing to a String cannot fail
            let _ = writeln!(conversation, "{}: {}", turn.sender.label(), turn.text);
        }
        let _ = write!(conversation, "{}: {}", ChatSender::User.label(), user_prompt);
        conversation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERSONA: &str = "Budget-conscious parents of toddlers in suburban Ohio";
    const BRAND: &str = "Sprout Snacks, organic puffs sold in resealable tubs";
    const PROMPT: &str = "Would you buy the mango flavour?";

    #[test]
    fn test_render_replaces_known_placeholders() {
        let mut variables = HashMap::new();
        variables.insert("NAME", "Ada");

        assert_eq!(TemplateEngine::render("Hello {{NAME}}!", &variables), "Hello Ada!");
    }

    #[test]
    fn test_render_keeps_unknown_and_unterminated_placeholders() {
        let variables = HashMap::new();

        assert_eq!(TemplateEngine::render("a {{MISSING}} b", &variables), "a {{MISSING}} b");
        assert_eq!(TemplateEngine::render("a {{OPEN", &variables), "a {{OPEN");
    }

    #[test]
    fn test_render_does_not_expand_substituted_values() {
        let mut variables = HashMap::new();
        variables.insert("A", "{{B}}");
        variables.insert("B", "boom");

        assert_eq!(TemplateEngine::render("{{A}}", &variables), "{{B}}");
    }

    #[test]
    fn test_prompt_without_history() {
        let prompt = TemplateEngine::render_persona_prompt(PERSONA, BRAND, PROMPT, &[]);

        assert_eq!(prompt.matches(PERSONA).count(), 1);
        assert_eq!(prompt.matches(BRAND).count(), 1);
        assert_eq!(prompt.matches(PROMPT).count(), 1);

        let persona_at = prompt.find(PERSONA).unwrap();
        let brand_at = prompt.find(BRAND).unwrap();
        let prompt_at = prompt.find(PROMPT).unwrap();
        assert!(persona_at < brand_at);
        assert!(brand_at < prompt_at);

        assert!(prompt.contains(&format!("User: {PROMPT}")));
        assert!(prompt.ends_with("Agent:"));
    }

    #[test]
    fn test_prompt_with_history_keeps_turn_order() {
        let history = vec![ChatTurn::user("Hi"), ChatTurn::agent("Hello")];
        let prompt = TemplateEngine::render_persona_prompt(PERSONA, BRAND, "How are you?", &history);

        let lines: Vec<&str> = prompt.lines().collect();
        let user_hi = lines.iter().position(|l| *l == "User: Hi").unwrap();
        let agent_hello = lines.iter().position(|l| *l == "Agent: Hello").unwrap();
        let user_now = lines.iter().position(|l| *l == "User: How are you?").unwrap();
        let cue = lines.len() - 1;

        assert!(user_hi < agent_hello);
        assert!(agent_hello < user_now);
        assert!(user_now < cue);
        assert_eq!(lines[cue], "Agent:");
    }

    #[test]
    fn test_prompt_with_placeholder_like_user_text() {
        let prompt = TemplateEngine::render_persona_prompt(PERSONA, BRAND, "What about {{BRAND_CONTEXT}}?", &[]);

        assert!(prompt.contains("User: What about {{BRAND_CONTEXT}}?"));
        assert_eq!(prompt.matches(BRAND).count(), 1);
    }
}
