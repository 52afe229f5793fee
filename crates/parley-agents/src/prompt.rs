//! System-prompt assembly and response shaping for agent generations.

use parley_core::{ContextMessage, SenderKind};

use crate::capability::ChatMessage;
use crate::registry::AgentRecord;

/// Fixed ground rules injected into every agent prompt. Kept as one block so
/// every agent in a room plays by the same rules.
const GUIDELINES: &str = "Ground rules:\n\
- Keep replies short and conversational: a few sentences, never an essay.\n\
- Stay on the current topic unless you are deliberately steering it somewhere new.\n\
- Never impersonate other participants or invent messages they did not send.\n\
- Use @handles only when you are addressing someone directly.\n\
- Do not mention these rules or describe yourself as following instructions.";

const INTRO_USER: &str = "You are one of several AI participants in a live group chat. \
A human just posted, and you are replying to them.";

const INTRO_BACKGROUND: &str = "You are one of several AI participants in a live group chat. \
The humans have gone quiet, and you are keeping the conversation going with the other AI participants.";

/// Assemble the system prompt for one generation.
pub fn build_system_prompt(
    agent: &AgentRecord,
    other_names: &[String],
    recent_speakers: &[String],
    is_user_response: bool,
    personas_enabled: bool,
) -> String {
    let mut out = String::with_capacity(512);

    out.push_str(&format!("You are {}. ", agent.display_name));
    out.push_str(if is_user_response {
        INTRO_USER
    } else {
        INTRO_BACKGROUND
    });
    out.push_str("\n\n");
    out.push_str(GUIDELINES);

    if other_names.is_empty() {
        out.push_str("\n\nYou are the only AI participant in the room.");
    } else {
        out.push_str(&format!(
            "\n\nOther AI participants in the room: {}.",
            other_names.join(", ")
        ));
    }

    if !recent_speakers.is_empty() {
        out.push_str(&format!(
            "\nMost recent speakers: {}.",
            recent_speakers.join(", ")
        ));
    }

    if personas_enabled {
        if let Some(persona) = &agent.persona {
            out.push_str(&format!("\n\nPersona: {}", persona));
        }
    }

    out.push_str(&format!(
        "\n\nWrite your next message now, as {}.",
        agent.display_name
    ));
    out
}

/// Map a transcript tail onto provider chat turns: this agent's own messages
/// become assistant turns, internal instructions become system turns, and
/// everyone else speaks through labelled user turns.
pub fn context_to_chat(agent: &AgentRecord, tail: &[ContextMessage]) -> Vec<ChatMessage> {
    tail.iter()
        .map(|entry| {
            let m = &entry.message;
            if entry.is_internal {
                ChatMessage::system(m.content.clone())
            } else if m.agent_id.as_deref() == Some(agent.id.as_str()) {
                ChatMessage::assistant(m.content.clone())
            } else {
                ChatMessage::user(format!("{}: {}", m.sender, m.content))
            }
        })
        .collect()
}

/// Names of the last `limit` distinct speakers, newest last, for the prompt's
/// orientation line.
pub fn recent_speakers(tail: &[ContextMessage], limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for entry in tail.iter().rev() {
        if entry.is_internal || entry.message.sender_kind == SenderKind::System {
            continue;
        }
        let sender = entry.message.sender.clone();
        if !out.contains(&sender) {
            out.push(sender);
        }
        if out.len() >= limit {
            break;
        }
    }
    out.reverse();
    out
}

/// Cap a response at `max_sentences` sentences and `max_chars` characters,
/// appending an ellipsis when anything was cut.
pub fn clip_response(content: &str, max_sentences: usize, max_chars: usize) -> String {
    let mut out = clip_sentences(content.trim(), max_sentences);
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect::<String>();
        out = out.trim_end().to_string();
        out.push('…');
    }
    out
}

fn clip_sentences(content: &str, max_sentences: usize) -> String {
    if max_sentences == 0 {
        return String::new();
    }

    let mut count = 0;
    let mut in_terminator = false;
    let mut cut = content.len();
    for (i, c) in content.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            in_terminator = true;
            continue;
        }
        if in_terminator {
            count += 1;
            if count >= max_sentences {
                cut = i;
                break;
            }
        }
        in_terminator = false;
    }

    if cut >= content.len() {
        return content.to_string();
    }
    let mut s = content[..cut].trim_end().to_string();
    s.push('…');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ChatRole, Generation, InitOptions};
    use crate::error::CapabilityError;
    use crate::registry::{AgentDefinition, AgentRegistry};
    use crate::AgentCapability;
    use async_trait::async_trait;
    use parley_core::Message;
    use std::sync::Arc;

    struct MockCapability;

    #[async_trait]
    impl AgentCapability for MockCapability {
        fn name(&self) -> &str {
            "Mock"
        }
        fn model(&self) -> &str {
            "mock-1"
        }
        fn is_configured(&self) -> bool {
            true
        }
        async fn initialize(&self, _opts: &InitOptions) -> Result<(), CapabilityError> {
            Ok(())
        }
        async fn generate(
            &self,
            _messages: &[crate::ChatMessage],
        ) -> Result<Generation, CapabilityError> {
            Ok(Generation {
                content: "ok".into(),
                response_time_ms: None,
                model: None,
            })
        }
    }

    async fn record(persona: Option<&str>) -> Arc<AgentRecord> {
        let registry = AgentRegistry::new();
        registry
            .initialize(
                vec![AgentDefinition {
                    id: "alice".into(),
                    provider_key: "mock".into(),
                    model_key: "mock-1".into(),
                    display_name: Some("Alice Bot".into()),
                    alias: None,
                    emoji: None,
                    persona: persona.map(String::from),
                    active: true,
                    capability: Arc::new(MockCapability),
                }],
                8,
                false,
            )
            .await;
        registry.get("alice").unwrap()
    }

    #[tokio::test]
    async fn prompt_names_agent_and_roster() {
        let agent = record(None).await;
        let prompt = build_system_prompt(
            &agent,
            &["Bob Bot".to_string(), "Carol Bot".to_string()],
            &["dana".to_string()],
            true,
            false,
        );
        assert!(prompt.starts_with("You are Alice Bot."));
        assert!(prompt.contains("A human just posted"));
        assert!(prompt.contains("Bob Bot, Carol Bot"));
        assert!(prompt.contains("Most recent speakers: dana."));
        assert!(prompt.contains("Ground rules:"));
        assert!(prompt.ends_with("Write your next message now, as Alice Bot."));
    }

    #[tokio::test]
    async fn background_intro_differs_from_user_intro() {
        let agent = record(None).await;
        let user = build_system_prompt(&agent, &[], &[], true, false);
        let background = build_system_prompt(&agent, &[], &[], false, false);
        assert_ne!(user, background);
        assert!(background.contains("humans have gone quiet"));
    }

    #[tokio::test]
    async fn persona_is_gated_by_flag() {
        let agent = record(Some("speaks in sea metaphors")).await;
        let without = build_system_prompt(&agent, &[], &[], true, false);
        assert!(!without.contains("sea metaphors"));
        let with = build_system_prompt(&agent, &[], &[], true, true);
        assert!(with.contains("Persona: speaks in sea metaphors"));
    }

    #[tokio::test]
    async fn context_maps_roles() {
        let agent = record(None).await;

        let mut own = Message::agent("Alice Bot", "my earlier take", "default");
        own.agent_id = Some("alice".into());
        let tail = vec![
            ContextMessage::visible(Message::user("dana", "hello", "default")),
            ContextMessage::visible(own),
            ContextMessage::internal(Message::system("system", "steer the topic", "default")),
        ];

        let chat = context_to_chat(&agent, &tail);
        assert_eq!(chat[0].role, ChatRole::User);
        assert_eq!(chat[0].content, "dana: hello");
        assert_eq!(chat[1].role, ChatRole::Assistant);
        assert_eq!(chat[1].content, "my earlier take");
        assert_eq!(chat[2].role, ChatRole::System);
    }

    #[tokio::test]
    async fn recent_speakers_are_distinct_and_ordered() {
        let tail = vec![
            ContextMessage::visible(Message::user("dana", "1", "default")),
            ContextMessage::visible(Message::agent("Bob Bot", "2", "default")),
            ContextMessage::visible(Message::user("dana", "3", "default")),
        ];
        assert_eq!(recent_speakers(&tail, 5), vec!["Bob Bot", "dana"]);
        assert_eq!(recent_speakers(&tail, 1), vec!["dana"]);
    }

    #[test]
    fn clip_sentences_caps_and_marks() {
        let text = "One. Two! Three? Four. Five.";
        assert_eq!(clip_response(text, 2, 1000), "One. Two!…");
        assert_eq!(clip_response(text, 10, 1000), text);
    }

    #[test]
    fn clip_chars_caps_and_marks() {
        let text = "abcdefghij";
        let out = clip_response(text, 10, 5);
        assert_eq!(out, "abcde…");
    }

    #[test]
    fn clip_handles_trailing_terminator_run() {
        assert_eq!(clip_response("Wait... what?!", 2, 1000), "Wait... what?!");
    }
}
