//! `cairn ask` — answer one message through the verifying loop.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use cairn_agent::{AssistantLoop, AssistantReply, RunContext};
use cairn_config::AppConfig;
use cairn_core::message::{Message, Role};
use cairn_core::tool::ToolProvider;
use cairn_knowledge::InMemoryKnowledge;
use serde::Deserialize;

/// One line of a history file.
#[derive(Debug, Deserialize)]
struct HistoryEntry {
    role: Role,
    content: String,
}

pub async fn run(
    message: &str,
    history: Option<&Path>,
    knowledge: Option<&Path>,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CAIRN_API_KEY      (takes priority)");
        eprintln!("    ANTHROPIC_API_KEY");
        eprintln!();
        eprintln!("  Or add `api_key` to {}", AppConfig::config_path().display());
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let provider = Arc::new(cairn_providers::build_from_config(&config)?);
    let tool_providers: Vec<Arc<dyn ToolProvider>> =
        vec![Arc::new(cairn_tools::builtin_provider())];
    let mut agent = AssistantLoop::from_config(provider, &config, tool_providers);

    if let Some(path) = knowledge {
        let kb = InMemoryKnowledge::from_json_file("knowledge", path).await?;
        tracing::debug!(entries = kb.len().await, "Knowledge loaded");
        agent = agent.with_knowledge(Arc::new(kb));
    }

    let history = match history {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_history(&raw).with_context(|| format!("Invalid history in {}", path.display()))?
        }
        None => Vec::new(),
    };

    let conversation_id = conversation.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ctx = RunContext::new(conversation_id)
        .with_history(history)
        .on_phase(|phase, attempt| eprintln!("  ... {phase} (attempt {attempt})"));

    let reply = agent.run(message, ctx).await?;
    print_reply(&reply);
    Ok(())
}

fn parse_history(raw: &str) -> anyhow::Result<Vec<Message>> {
    let entries: Vec<HistoryEntry> = serde_json::from_str(raw)?;
    entries
        .into_iter()
        .map(|entry| match entry.role {
            Role::User => Ok(Message::user(entry.content)),
            Role::Assistant => Ok(Message::assistant(entry.content)),
            other => bail!("history can only hold user and assistant turns, got {other:?}"),
        })
        .collect()
}

fn print_reply(reply: &AssistantReply) {
    println!("{}", reply.content);
    println!();

    let status = if reply.verified { "verified" } else { "not verified" };
    eprintln!("  Status:    {status} after {} attempt(s)", reply.attempt_count);
    if let Some(usage) = &reply.usage {
        eprintln!(
            "  Tokens:    {} in / {} out",
            usage.prompt_tokens, usage.completion_tokens
        );
    }
    if !reply.unavailable_providers.is_empty() {
        eprintln!("  Skipped:   {}", reply.unavailable_providers.join(", "));
    }
    if !reply.sources.is_empty() {
        eprintln!("  Sources:");
        for source in &reply.sources {
            eprintln!("    [{}] {} ({})", source.id, source.title, source.reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_entries_become_messages() {
        let raw = r#"[
            {"role": "user", "content": "I prefer metric units"},
            {"role": "assistant", "content": "Noted."}
        ]"#;
        let history = parse_history(raw).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Noted.");
    }

    #[test]
    fn history_rejects_tool_turns() {
        let raw = r#"[{"role": "tool", "content": "42"}]"#;
        assert!(parse_history(raw).is_err());
    }

    #[test]
    fn history_must_be_an_array() {
        assert!(parse_history(r#"{"role": "user"}"#).is_err());
    }
}
