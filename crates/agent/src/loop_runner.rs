//! The Gather-Act-Verify loop.

use std::sync::Arc;
use std::time::Duration;

use cairn_config::{AgentConfig, AppConfig, HealthConfig};
use cairn_core::error::{Error, KnowledgeError, ProviderError, ToolError};
use cairn_core::event::{DomainEvent, EventBus};
use cairn_core::evidence::EvidenceItem;
use cairn_core::knowledge::KnowledgeSource;
use cairn_core::message::{Message, MessageToolCall};
use cairn_core::provider::{Provider, ProviderRequest, StopReason, StreamEvent, Usage};
use cairn_core::tool::{ToolKey, ToolProvider};
use cairn_telemetry::{Span, SpanKind, TelemetryEngine};
use cairn_tools::sanitize::{sanitize_args, truncate};
use cairn_tools::{HealthThresholds, HealthTracker, OfferedTools, ToolCatalog, ToolExecution, ToolGateway};
use cairn_verify::{VerificationEngine, VerificationResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::citations::{Citation, CitationRegistry, detect_uncited_claims, render_footer};
use crate::compaction::{Compactor, ProviderSummarizer};
use crate::prompt::{GRACEFUL_FAILURE_MESSAGE, build_system_prompt, unavailability_note};
use crate::state::{AttemptContext, LoopState, MAX_ATTEMPTS, Phase, StateMachine};
use crate::stream_event::ReplyEvent;

/// Longest tool output echoed in a `ToolResult` reply event.
const TOOL_OUTPUT_PREVIEW_CHARS: usize = 200;

/// Called on every phase transition with the attempt number.
pub type PhaseCallback = Arc<dyn Fn(Phase, u32) + Send + Sync>;

/// What the caller hands in with each message.
#[derive(Clone, Default)]
pub struct RunContext {
    pub conversation_id: String,
    /// Prior turns, oldest first. Only user and assistant messages are used.
    pub history: Vec<Message>,
    /// Evidence the caller already has (e.g. thread messages).
    pub evidence: Vec<EvidenceItem>,
    pub cancel: CancellationToken,
    on_phase: Option<PhaseCallback>,
    reply_events: Option<mpsc::Sender<ReplyEvent>>,
}

impl RunContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_evidence(mut self, evidence: Vec<EvidenceItem>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn on_phase(mut self, callback: impl Fn(Phase, u32) + Send + Sync + 'static) -> Self {
        self.on_phase = Some(Arc::new(callback));
        self
    }

    /// Receive progress events. Only released text is ever sent.
    pub fn with_reply_events(mut self, sender: mpsc::Sender<ReplyEvent>) -> Self {
        self.reply_events = Some(sender);
        self
    }
}

/// The result of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantReply {
    pub content: String,
    /// Every citation gathered for the released attempt.
    pub sources: Vec<Citation>,
    pub verified: bool,
    pub attempt_count: u32,
    /// Tool providers left out because they were unhealthy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable_providers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl AssistantReply {
    /// The fixed reply once every attempt failed verification.
    pub fn graceful_failure() -> Self {
        Self {
            content: GRACEFUL_FAILURE_MESSAGE.to_string(),
            sources: Vec::new(),
            verified: false,
            attempt_count: MAX_ATTEMPTS,
            unavailable_providers: Vec::new(),
            usage: None,
        }
    }
}

/// One provider turn, fully collected.
#[derive(Debug, Default)]
struct Turn {
    text: String,
    tool_uses: Vec<MessageToolCall>,
    usage: Option<Usage>,
}

/// Request-local state threaded through the phases.
struct Request<'a> {
    ctx: &'a RunContext,
    trace_id: String,
    usage: Usage,
    excluded: Vec<String>,
}

impl Request<'_> {
    fn check_cancelled(&self) -> Result<(), Error> {
        if self.ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Never waits on the receiver. Events that do not fit are dropped.
    fn emit(&self, event: ReplyEvent) {
        let Some(sender) = &self.ctx.reply_events else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(event = event.event_type(), "Reply event receiver is full, dropping event");
            }
            // A dropped receiver only means nobody is watching
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn add_usage(&mut self, usage: &Usage) {
        self.usage.prompt_tokens += usage.prompt_tokens;
        self.usage.completion_tokens += usage.completion_tokens;
        self.usage.total_tokens += usage.total_tokens;
    }
}

/// Health thresholds as configured.
pub fn health_thresholds(config: &HealthConfig) -> HealthThresholds {
    HealthThresholds {
        degraded: config.degraded_threshold,
        unhealthy: config.unhealthy_threshold,
        probe_after: (config.probe_after_secs > 0)
            .then(|| Duration::from_secs(config.probe_after_secs)),
    }
}

/// Orchestrates one request: gather evidence, draft with tools, verify,
/// retry with feedback, and release or fail gracefully.
pub struct AssistantLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,

    catalog: Arc<ToolCatalog>,
    gateway: Arc<ToolGateway>,
    knowledge: Vec<Arc<dyn KnowledgeSource>>,
    verifier: Arc<VerificationEngine>,
    compactor: Option<Compactor>,

    events: Arc<EventBus>,
    telemetry: Arc<TelemetryEngine>,

    /// Tool rounds per attempt before a tool-less final call.
    max_tool_loops: u32,
    /// Longest wait for the next stream event.
    stream_timeout: Duration,
    lookup_timeout: Duration,
    recall_limit: usize,
}

impl AssistantLoop {
    /// A loop with default settings, no tools, no knowledge and no compaction.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        let defaults = AgentConfig::default();
        let tracker = Arc::new(HealthTracker::new(HealthThresholds::default()));
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: defaults.system_prompt,
            catalog: Arc::new(ToolCatalog::new(
                Duration::from_secs(300),
                Duration::from_secs(10),
            )),
            gateway: Arc::new(ToolGateway::new(
                tracker,
                Duration::from_secs(defaults.tool_timeout_secs),
            )),
            knowledge: Vec::new(),
            verifier: Arc::new(VerificationEngine::default()),
            compactor: None,
            events: Arc::new(EventBus::default()),
            telemetry: Arc::new(TelemetryEngine::new()),
            max_tool_loops: defaults.max_tool_loops,
            stream_timeout: Duration::from_secs(defaults.stream_timeout_secs),
            lookup_timeout: Duration::from_secs(defaults.lookup_timeout_secs),
            recall_limit: defaults.recall_limit,
        }
    }

    /// Wire a loop from configuration, with the given tool providers.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        config: &AppConfig,
        tool_providers: impl IntoIterator<Item = Arc<dyn ToolProvider>>,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let tracker = Arc::new(HealthTracker::new(health_thresholds(&config.health)));
        let gateway = ToolGateway::new(
            tracker,
            Duration::from_secs(config.agent.tool_timeout_secs),
        )
        .with_events(events.clone());
        let catalog = tool_providers.into_iter().fold(
            ToolCatalog::new(
                Duration::from_secs(config.tools.catalog_ttl_secs),
                Duration::from_secs(config.tools.discovery_timeout_secs),
            ),
            ToolCatalog::with_provider,
        );

        let mut agent = Self::new(provider.clone(), &config.default_model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_system_prompt(&config.agent.system_prompt)
            .with_max_tool_loops(config.agent.max_tool_loops)
            .with_stream_timeout(Duration::from_secs(config.agent.stream_timeout_secs))
            .with_lookup_timeout(Duration::from_secs(config.agent.lookup_timeout_secs))
            .with_recall_limit(config.agent.recall_limit)
            .with_verifier(VerificationEngine::standard(config.verification.min_length_cap))
            .with_events(events)
            .with_tools(Arc::new(catalog), Arc::new(gateway));

        if !config.telemetry.enabled {
            agent = agent.with_telemetry(Arc::new(TelemetryEngine::disabled()));
        }
        if config.compaction.enabled {
            let summarizer = ProviderSummarizer::new(provider, &config.default_model);
            agent = agent.with_compactor(Compactor::new(Arc::new(summarizer), &config.compaction));
        }
        agent
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Use this catalog and gateway. The gateway's tracker decides which
    /// tools are offered.
    pub fn with_tools(mut self, catalog: Arc<ToolCatalog>, gateway: Arc<ToolGateway>) -> Self {
        self.catalog = catalog;
        self.gateway = gateway;
        self
    }

    pub fn with_knowledge(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge.push(source);
        self
    }

    pub fn with_verifier(mut self, verifier: VerificationEngine) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn with_compactor(mut self, compactor: Compactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// Domain events from the loop. A gateway passed to [`Self::with_tools`]
    /// publishes to its own bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_max_tool_loops(mut self, max: u32) -> Self {
        self.max_tool_loops = max;
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn telemetry(&self) -> &Arc<TelemetryEngine> {
        &self.telemetry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        self.gateway.tracker()
    }

    /// Answer one user message.
    ///
    /// Completion-provider failures and cancellation are returned as errors.
    /// Everything else, including exhausted attempts, yields a reply.
    pub async fn run(&self, user_message: &str, ctx: RunContext) -> Result<AssistantReply, Error> {
        let span = info_span!("request", conversation_id = %ctx.conversation_id);
        async {
            info!(history = ctx.history.len(), evidence = ctx.evidence.len(), "Handling message");

            let mut req = Request {
                ctx: &ctx,
                trace_id: self.telemetry.start_trace(&ctx.conversation_id),
                usage: Usage::default(),
                excluded: Vec::new(),
            };
            let mut turn_span = Span::new(SpanKind::Turn, "run");
            let result = self.run_attempts(user_message, &mut req).await;

            turn_span.record_tokens(req.usage.prompt_tokens, req.usage.completion_tokens);
            turn_span.end(result.as_ref().is_ok_and(|r| r.verified));
            self.telemetry.record_span(&req.trace_id, turn_span);
            self.telemetry.end_trace(&req.trace_id);

            match &result {
                Ok(reply) => {
                    info!(verified = reply.verified, attempts = reply.attempt_count, sources = reply.sources.len(), "Reply ready");
                    self.events.publish(DomainEvent::ResponseGenerated {
                        conversation_id: ctx.conversation_id.clone(),
                        model: self.model.clone(),
                        verified: reply.verified,
                        attempt_count: reply.attempt_count,
                        tokens_used: req.usage.total_tokens,
                        timestamp: Utc::now(),
                    });
                    req.emit(ReplyEvent::Done {
                        conversation_id: ctx.conversation_id.clone(),
                        verified: reply.verified,
                        attempt_count: reply.attempt_count,
                        usage: reply.usage.clone(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Request failed");
                    self.events.publish(DomainEvent::ErrorOccurred {
                        context: format!("request {}", ctx.conversation_id),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    req.emit(ReplyEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_attempts(
        &self,
        user_message: &str,
        req: &mut Request<'_>,
    ) -> Result<AssistantReply, Error> {
        let mut machine = StateMachine::new();

        // ── Gather ──
        self.enter(req, Phase::Gather, 1);
        req.check_cancelled()?;
        let mut gather_span = Span::new(SpanKind::Phase, Phase::Gather.as_str()).with_attempt(1);
        let history = self.prepare_history(req).await;
        let evidence = self.gather_evidence(user_message, req).await;
        let registry = CitationRegistry::build(&evidence);
        gather_span = gather_span.with_metadata("evidence", evidence.len());
        gather_span.end(true);
        self.telemetry.record_span(&req.trace_id, gather_span);
        debug!(history = history.len(), evidence = evidence.len(), citations = registry.len(), "Gathered context");

        let mut attempt = AttemptContext::new();
        loop {
            let n = attempt.attempt_number;

            // ── Act ──
            machine.advance(LoopState::Drafting)?;
            self.enter(req, Phase::Act, n);
            let feedback = attempt.verification_feedback.as_deref().map(|f| (f, n));
            let system_prompt = build_system_prompt(&self.system_prompt, registry.citations(), feedback);
            let draft = match self.act(&system_prompt, &history, user_message, n, req).await {
                Ok(draft) => draft,
                Err(e) => {
                    machine.advance(LoopState::Failed)?;
                    return Err(e);
                }
            };

            // ── Verify ──
            machine.advance(LoopState::Verifying)?;
            self.enter(req, Phase::Verify, n);
            let result = self.verify(&draft, user_message, &evidence, n, req);

            if result.passed {
                machine.advance(LoopState::Released)?;
                self.enter(req, Phase::Final, n);
                return Ok(self.release(&draft, &registry, n, req));
            }

            if !attempt.record_failure(&result) {
                machine.advance(LoopState::Failed)?;
                self.enter(req, Phase::Final, n);
                warn!(attempts = n, "Every draft failed verification, returning failure notice");
                let mut reply = AssistantReply::graceful_failure();
                reply.usage = Some(req.usage.clone());
                return Ok(reply);
            }

            machine.advance(LoopState::Retrying)?;
            info!(attempt = n, issues = result.issues.len(), "Draft rejected, retrying with feedback");
            req.emit(ReplyEvent::Retrying {
                attempt: attempt.attempt_number,
                issues: result.issues.iter().map(|i| i.rule_name.clone()).collect(),
            });
        }
    }

    fn enter(&self, req: &Request<'_>, phase: Phase, attempt: u32) {
        debug!(%phase, attempt, "Entering phase");
        if let Some(callback) = &req.ctx.on_phase {
            callback(phase, attempt);
        }
        self.events.publish(DomainEvent::PhaseChanged {
            conversation_id: req.ctx.conversation_id.clone(),
            phase: phase.as_str().to_string(),
            attempt,
            timestamp: Utc::now(),
        });
        req.emit(ReplyEvent::Phase { phase, attempt });
    }

    /// Conversational history, compacted when it is over budget.
    async fn prepare_history(&self, req: &Request<'_>) -> Vec<Message> {
        let history: Vec<Message> = req
            .ctx
            .history
            .iter()
            .filter(|m| m.is_conversational())
            .cloned()
            .collect();

        let Some(compactor) = &self.compactor else {
            return history;
        };
        if !compactor.needs_compaction(&history) {
            return history;
        }

        let span = Span::new(SpanKind::Compaction, "history");
        let result = compactor.compact(&history).await;
        let mut span = span
            .with_metadata("original_tokens", result.original_token_estimate)
            .with_metadata("compacted_tokens", result.compacted_token_estimate);
        span.end(result.applied);
        self.telemetry.record_span(&req.trace_id, span);

        if result.applied {
            self.events.publish(DomainEvent::CompactionApplied {
                conversation_id: req.ctx.conversation_id.clone(),
                original_tokens: result.original_token_estimate,
                compacted_tokens: result.compacted_token_estimate,
                timestamp: Utc::now(),
            });
        } else {
            self.events.publish(DomainEvent::ErrorOccurred {
                context: "compaction".into(),
                error_message: "history over budget but not compacted".into(),
                timestamp: Utc::now(),
            });
        }
        result.compacted_history
    }

    /// Caller evidence plus knowledge lookups. Lookup failures only shrink
    /// the evidence set.
    async fn gather_evidence(&self, user_message: &str, req: &Request<'_>) -> Vec<EvidenceItem> {
        let mut evidence = req.ctx.evidence.clone();

        for source in &self.knowledge {
            let lookup = source.search(user_message, self.recall_limit);
            let error = match tokio::time::timeout(self.lookup_timeout, lookup).await {
                Ok(Ok(hits)) => {
                    debug!(source = source.name(), hits = hits.len(), "Knowledge lookup");
                    evidence.extend(hits.into_iter().map(EvidenceItem::from));
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => KnowledgeError::Timeout(self.lookup_timeout.as_secs()),
            };
            warn!(source = source.name(), error = %error, "Knowledge lookup failed, continuing without it");
            self.events.publish(DomainEvent::ErrorOccurred {
                context: format!("knowledge lookup {}", source.name()),
                error_message: error.to_string(),
                timestamp: Utc::now(),
            });
        }

        evidence
    }

    /// Produce one draft. Tool calls are served one at a time inside the
    /// same turn; the text of the last turn is the draft.
    async fn act(
        &self,
        system_prompt: &str,
        history: &[Message],
        user_message: &str,
        attempt: u32,
        req: &mut Request<'_>,
    ) -> Result<String, Error> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend_from_slice(history);
        messages.push(Message::user(user_message));

        let mut round = 0;
        loop {
            req.check_cancelled()?;
            let tools_allowed = round < self.max_tool_loops;
            let offered = if tools_allowed {
                self.offered_tools(req).await
            } else {
                warn!(max_tool_loops = self.max_tool_loops, "Tool budget spent, asking for an answer without tools");
                OfferedTools::default()
            };

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: offered.definitions.clone(),
                stream: true,
                stop: vec![],
            };
            let turn = self.provider_turn(request, attempt, req).await?;

            if turn.tool_uses.is_empty() || offered.definitions.is_empty() {
                return Ok(turn.text);
            }

            let mut assistant = Message::assistant(turn.text);
            assistant.tool_calls = turn.tool_uses.clone();
            messages.push(assistant);

            for call in &turn.tool_uses {
                req.check_cancelled()?;
                self.enter(req, Phase::Tool, attempt);
                messages.push(self.run_tool(call, &offered, attempt, req).await);
            }
            round += 1;
        }
    }

    async fn offered_tools(&self, req: &mut Request<'_>) -> OfferedTools {
        let offered = self.catalog.offered_tools(self.gateway.tracker()).await;
        for provider in &offered.excluded_providers {
            if !req.excluded.contains(provider) {
                warn!(provider = %provider, "Tool provider unhealthy, not offering its tools");
                req.excluded.push(provider.clone());
            }
        }
        offered
    }

    async fn run_tool(
        &self,
        call: &MessageToolCall,
        offered: &OfferedTools,
        attempt: u32,
        req: &Request<'_>,
    ) -> Message {
        req.emit(ReplyEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: sanitize_args(&call.input),
        });

        let was_offered = offered.definitions.iter().any(|d| d.name == call.name);
        let execution = match self.catalog.resolve(&call.name).filter(|_| was_offered) {
            Some((provider, key)) => {
                self.gateway
                    .execute(provider.as_ref(), &key.name, call.input.clone())
                    .await
            }
            None => {
                warn!(tool = %call.name, "Model asked for a tool that was not offered");
                ToolExecution {
                    key: ToolKey::parse(&call.name).unwrap_or_else(|| ToolKey::new("unknown", &call.name)),
                    outcome: Err(ToolError::NotFound(call.name.clone())),
                    duration_ms: 0,
                }
            }
        };

        let text = execution.result_text();
        let mut span = Span::new(SpanKind::ToolExecution, &call.name).with_attempt(attempt);
        span.end_with_duration(execution.success(), execution.duration_ms);
        self.telemetry.record_span(&req.trace_id, span);

        req.emit(ReplyEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            output: truncate(&text, TOOL_OUTPUT_PREVIEW_CHARS),
            success: execution.success(),
        });

        if execution.success() {
            Message::tool_result(&call.id, text)
        } else {
            Message::tool_error(&call.id, text)
        }
    }

    async fn provider_turn(
        &self,
        request: ProviderRequest,
        attempt: u32,
        req: &mut Request<'_>,
    ) -> Result<Turn, Error> {
        let mut span = Span::new(SpanKind::LlmCall, &self.model)
            .with_attempt(attempt)
            .with_metadata("tools", request.tools.len());
        let result = self.collect_stream(request, &req.ctx.cancel).await;

        match &result {
            Ok(turn) => {
                if let Some(usage) = &turn.usage {
                    span.record_tokens(usage.prompt_tokens, usage.completion_tokens);
                    req.add_usage(usage);
                }
                span.end(true);
            }
            Err(e) => {
                warn!(error = %e, "Completion provider call failed");
                span.end(false);
            }
        }
        self.telemetry.record_span(&req.trace_id, span);
        result
    }

    /// Drain one provider stream into a [`Turn`]. Every wait is bounded by
    /// the stream timeout and aborted on cancellation.
    async fn collect_stream(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Turn, Error> {
        let timeout_error = || {
            Error::from(ProviderError::Timeout(format!(
                "no response from provider within {}s",
                self.stream_timeout.as_secs()
            )))
        };

        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            opened = tokio::time::timeout(self.stream_timeout, self.provider.stream(request)) => {
                opened.map_err(|_| timeout_error())??
            }
        };

        let mut turn = Turn::default();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = tokio::time::timeout(self.stream_timeout, rx.recv()) => next,
            };

            match next.map_err(|_| timeout_error())? {
                None => {
                    return Err(ProviderError::StreamInterrupted(
                        "stream closed before the stop event".into(),
                    )
                    .into());
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(StreamEvent::TextDelta { text })) => turn.text.push_str(&text),
                Some(Ok(StreamEvent::ToolUse { id, name, input })) => {
                    debug!(tool = %name, "Model requested a tool");
                    turn.tool_uses.push(MessageToolCall { id, name, input });
                }
                Some(Ok(StreamEvent::Stop { stop_reason, usage })) => {
                    if stop_reason == StopReason::MaxTokens {
                        warn!("Provider hit the token limit, draft may be cut off");
                    }
                    turn.usage = usage;
                    return Ok(turn);
                }
            }
        }
    }

    fn verify(
        &self,
        draft: &str,
        user_message: &str,
        evidence: &[EvidenceItem],
        attempt: u32,
        req: &Request<'_>,
    ) -> VerificationResult {
        let result = self.verifier.verify(draft, user_message, evidence);

        let mut span = Span::new(SpanKind::Verification, format!("attempt-{attempt}"))
            .with_attempt(attempt)
            .with_metadata("issues", result.issues.len());
        span.end(result.passed);
        self.telemetry.record_span(&req.trace_id, span);

        self.events.publish(DomainEvent::VerificationCompleted {
            conversation_id: req.ctx.conversation_id.clone(),
            attempt,
            passed: result.passed,
            issue_count: result.issues.len(),
            timestamp: Utc::now(),
        });
        result
    }

    /// Attach the footer and unavailability note to a verified draft.
    fn release(
        &self,
        draft: &str,
        registry: &CitationRegistry,
        attempt: u32,
        req: &Request<'_>,
    ) -> AssistantReply {
        let check = detect_uncited_claims(draft, registry.citations());
        if check.has_uncited_claims {
            debug!(citations = registry.len(), "Released draft cites none of the gathered sources");
        }

        let mut content = draft.trim_end().to_string();
        let footer = render_footer(&registry.select(&check.cited_ids));
        if !footer.is_empty() {
            content.push_str("\n\n");
            content.push_str(&footer);
        }
        if let Some(note) = unavailability_note(&req.excluded) {
            content.push_str("\n\n");
            content.push_str(&note);
        }

        req.emit(ReplyEvent::Chunk {
            content: content.clone(),
        });

        AssistantReply {
            content,
            sources: registry.citations().to_vec(),
            verified: true,
            attempt_count: attempt,
            unavailable_providers: req.excluded.clone(),
            usage: Some(req.usage.clone()),
        }
    }
}
