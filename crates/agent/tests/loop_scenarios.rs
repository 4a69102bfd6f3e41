//! End-to-end scenarios for the cairn request loop.
//!
//! These run whole requests through `AssistantLoop::run` with scripted
//! providers: verification and retry, graceful failure, tool health
//! degradation, compaction, knowledge lookups and cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cairn_agent::{
    AssistantLoop, Compactor, GRACEFUL_FAILURE_MESSAGE, MAX_ATTEMPTS, RunContext, Summarizer,
};
use cairn_config::CompactionConfig;
use cairn_core::error::{Error, ProviderError, ToolError};
use cairn_core::event::DomainEvent;
use cairn_core::evidence::{EvidenceItem, EvidenceKind};
use cairn_core::knowledge::KnowledgeHit;
use cairn_core::message::{Message, MessageToolCall};
use cairn_core::provider::{
    EventStream, Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage,
};
use cairn_core::tool::ToolProvider;
use cairn_knowledge::InMemoryKnowledge;
use cairn_tools::{HealthStatus, HealthThresholds, HealthTracker, ToolCatalog, ToolGateway};
use cairn_verify::{Severity, VerificationEngine};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Replays scripted responses; the last one repeats when the script ends.
struct ScriptedProvider {
    script: Vec<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn texts(texts: &[&str]) -> Arc<Self> {
        Self::new(texts.iter().map(|t| text_response(t)).collect())
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len().min(self.script.len() - 1);
        requests.push(request);
        Ok(self.script[index].clone())
    }
}

/// Opens a stream and then never sends anything.
struct SilentProvider {
    senders: Mutex<Vec<tokio::sync::mpsc::Sender<Result<cairn_core::StreamEvent, ProviderError>>>>,
}

#[async_trait]
impl Provider for SilentProvider {
    fn name(&self) -> &str {
        "silent"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("stream only".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<EventStream, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        stop_reason: None,
        model: "mock-model".into(),
    }
}

fn tool_response(calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut response = text_response("");
    response.message.tool_calls = calls;
    response
}

fn call(id: &str, name: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        input: serde_json::json!({"city": "Oslo"}),
    }
}

// ── Mock tool provider ───────────────────────────────────────────────────

/// A weather integration whose calls hang until the gateway times out.
struct HangingWeather;

#[async_trait]
impl ToolProvider for HangingWeather {
    fn name(&self) -> &str {
        "weather"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(vec![ToolDefinition {
            name: "forecast".into(),
            description: "Weather forecast for a city".into(),
            parameters: serde_json::json!({"type": "object"}),
        }])
    }

    async fn call_tool(&self, _name: &str, _input: Value) -> Result<Value, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Value::Null)
    }
}

fn forecast_evidence() -> Vec<EvidenceItem> {
    vec![EvidenceItem::new(EvidenceKind::Web, "web:forecast")]
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn weather_answer_with_citation_is_released_first_try() {
    let provider = ScriptedProvider::texts(&["It is sunny [1]."]);
    let agent = AssistantLoop::new(provider.clone(), "mock-model");

    let reply = agent
        .run(
            "What is the weather?",
            RunContext::new("weather").with_evidence(forecast_evidence()),
        )
        .await
        .unwrap();

    assert!(reply.verified);
    assert_eq!(reply.attempt_count, 1);
    assert_eq!(reply.sources.len(), 1);
    assert_eq!(reply.sources[0].reference, "web:forecast");
    assert!(reply.content.ends_with("*Sources*\n• [1] web:forecast"));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn bold_markup_is_rejected_then_fixed() {
    let engine = VerificationEngine::default();
    let result = engine.verify("**bold**", "Make it bold", &[]);
    assert!(!result.passed);
    let issue = result.errors().next().unwrap();
    assert_eq!(issue.rule_name, "no-illegal-bold-markup");
    assert_eq!(issue.severity, Severity::Error);

    let provider = ScriptedProvider::texts(&["**bold**", "*bold*"]);
    let agent = AssistantLoop::new(provider.clone(), "mock-model");
    let reply = agent
        .run("Make it bold", RunContext::new("bold"))
        .await
        .unwrap();

    assert!(reply.verified);
    assert_eq!(reply.attempt_count, 2);
    assert_eq!(reply.content, "*bold*");

    let retry_prompt = &provider.request(1).messages[0].content;
    assert!(retry_prompt.contains("[no-illegal-bold-markup]"));
}

#[tokio::test]
async fn always_failing_drafts_end_in_graceful_failure() {
    let provider = ScriptedProvider::texts(&["> quoted and **loud**"]);
    let agent = AssistantLoop::new(provider.clone(), "mock-model");
    let mut events = agent.events().subscribe();

    let reply = agent
        .run(
            "Tell me something",
            RunContext::new("doomed").with_evidence(forecast_evidence()),
        )
        .await
        .unwrap();

    assert_eq!(provider.calls(), MAX_ATTEMPTS as usize);
    assert!(!reply.verified);
    assert_eq!(reply.attempt_count, MAX_ATTEMPTS);
    assert!(reply.sources.is_empty());
    assert_eq!(reply.content, GRACEFUL_FAILURE_MESSAGE);
    assert!(!reply.content.contains("loud"));

    let mut verifications = 0;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::VerificationCompleted { passed, .. } = event.as_ref() {
            assert!(!passed);
            verifications += 1;
        }
    }
    assert_eq!(verifications, MAX_ATTEMPTS);
}

#[tokio::test(start_paused = true)]
async fn unhealthy_tool_provider_is_dropped_and_named() {
    let tracker = Arc::new(HealthTracker::new(HealthThresholds {
        degraded: 2,
        unhealthy: 3,
        probe_after: None,
    }));
    let gateway = Arc::new(ToolGateway::new(tracker.clone(), Duration::from_secs(30)));
    let catalog = Arc::new(
        ToolCatalog::new(Duration::from_secs(300), Duration::from_secs(5))
            .with_provider(Arc::new(HangingWeather))
            .with_provider(Arc::new(cairn_tools::builtin_provider())),
    );

    // First request: the model asks for the forecast three times, each call times out
    let first = ScriptedProvider::new(vec![
        tool_response(vec![
            call("c1", "weather__forecast"),
            call("c2", "weather__forecast"),
            call("c3", "weather__forecast"),
        ]),
        text_response("I could not reach the weather service for Oslo just now."),
    ]);
    let agent = AssistantLoop::new(first.clone(), "mock-model")
        .with_tools(catalog.clone(), gateway.clone());
    let reply = agent
        .run("What is the weather in Oslo?", RunContext::new("r1"))
        .await
        .unwrap();
    assert!(reply.verified);

    let health = tracker.get("weather");
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.consecutive_failures, 3);
    let timed_out = first.request(1);
    let results: Vec<&Message> = timed_out
        .messages
        .iter()
        .filter(|m| m.tool_call_id.is_some())
        .collect();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|m| m.is_tool_error() && m.content.contains("timeout")));

    // Next request: weather tools are no longer offered and the reply says so
    let second = ScriptedProvider::texts(&["It is sunny [1]."]);
    let agent = AssistantLoop::new(second.clone(), "mock-model").with_tools(catalog, gateway);
    let reply = agent
        .run(
            "What is the weather?",
            RunContext::new("r2").with_evidence(forecast_evidence()),
        )
        .await
        .unwrap();

    assert!(reply.verified);
    assert_eq!(reply.attempt_count, 1);
    assert_eq!(reply.unavailable_providers, vec!["weather".to_string()]);
    assert!(reply.content.ends_with(
        "_Note: the weather integration is temporarily unavailable, so this answer may be incomplete._"
    ));
    let offered: Vec<String> = second.request(0).tools.iter().map(|t| t.name.clone()).collect();
    assert_eq!(offered, vec!["builtin__current_time".to_string()]);

    // One success restores it
    tracker.mark_success("weather");
    assert_eq!(tracker.get("weather").status, HealthStatus::Healthy);
    assert_eq!(tracker.get("weather").consecutive_failures, 0);
}

struct CountingSummarizer {
    calls: Mutex<usize>,
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(&self, _transcript: &str) -> Result<String, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        Ok("## Preferences\n- Prefers metric units".into())
    }
}

#[tokio::test]
async fn long_history_is_compacted_once_before_drafting() {
    let history: Vec<Message> = (0..12)
        .map(|i| {
            let text = format!("turn {i} {}", "x".repeat(200));
            if i % 2 == 0 {
                Message::user(text)
            } else {
                Message::assistant(text)
            }
        })
        .collect();

    let summarizer = Arc::new(CountingSummarizer {
        calls: Mutex::new(0),
    });
    let config = CompactionConfig {
        context_limit_tokens: 500,
        trigger_ratio: 0.8,
        keep_last_n: 4,
        ..CompactionConfig::default()
    };
    // Fails once so the history is reused by the second attempt
    let provider = ScriptedProvider::texts(&["**first**", "Use metric units, as you prefer."]);
    let agent = AssistantLoop::new(provider.clone(), "mock-model")
        .with_compactor(Compactor::new(summarizer.clone(), &config));
    let mut events = agent.events().subscribe();

    let reply = agent
        .run(
            "Which units should I use?",
            RunContext::new("long").with_history(history),
        )
        .await
        .unwrap();
    assert_eq!(reply.attempt_count, 2);
    assert_eq!(*summarizer.calls.lock().unwrap(), 1);

    for index in 0..2 {
        let messages = provider.request(index).messages;
        // system + summary + 4 kept + user
        assert_eq!(messages.len(), 7);
        assert!(messages[1].content.contains("Prefers metric units"));
        assert!(messages[2].content.starts_with("turn 8"));
    }

    let mut compacted = false;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::CompactionApplied {
            original_tokens,
            compacted_tokens,
            ..
        } = event.as_ref()
        {
            assert!(compacted_tokens < original_tokens);
            compacted = true;
        }
    }
    assert!(compacted);
}

#[tokio::test]
async fn knowledge_hits_become_numbered_sources() {
    let kb = InMemoryKnowledge::from_hits(
        "notes",
        vec![
            KnowledgeHit::new("file:deploy.md", "Deploys run every Tuesday")
                .with_title("Deploy schedule")
                .with_category("file"),
            KnowledgeHit::new("web:status", "Deploys paused for the holidays")
                .with_url("https://status.example")
                .with_category("web"),
        ],
    );
    let provider = ScriptedProvider::texts(&["Deploys run on Tuesdays [1], but are paused now [2]."]);
    let agent = AssistantLoop::new(provider.clone(), "mock-model").with_knowledge(Arc::new(kb));

    let reply = agent
        .run("When do deploys run?", RunContext::new("kb"))
        .await
        .unwrap();

    assert!(reply.verified);
    assert_eq!(reply.sources.len(), 2);
    assert!(reply.content.contains("• [1] Deploy schedule"));
    assert!(reply.content.contains("• [2] <https://status.example|web:status>"));
    let system = &provider.request(0).messages[0].content;
    assert!(system.contains("[1] (file) Deploy schedule: Deploys run every Tuesday"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_a_stalled_stream() {
    let provider = Arc::new(SilentProvider {
        senders: Mutex::new(Vec::new()),
    });
    let agent = AssistantLoop::new(provider, "mock-model");
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = agent
        .run("Hello there", RunContext::new("gone").with_cancellation(token))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn idle_stream_times_out_as_provider_error() {
    let provider = Arc::new(SilentProvider {
        senders: Mutex::new(Vec::new()),
    });
    let agent = AssistantLoop::new(provider, "mock-model").with_stream_timeout(Duration::from_secs(5));

    let err = agent
        .run("Hello there", RunContext::new("idle"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(ProviderError::Timeout(_))));
}
