//! Thread-safe telemetry engine. Collects spans per request trace.
//!
//! Write-only from the loop's point of view: the request path records
//! spans and never reads them back. Queries exist for operators and tests.

use crate::model::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Completed traces kept in memory before the oldest are pruned.
const MAX_TRACES: usize = 5_000;

/// Traces keyed by id, each behind its own lock so concurrent requests
/// only contend on the map while looking their trace up.
#[derive(Default)]
struct TraceStore {
    by_id: HashMap<String, Arc<Mutex<Trace>>>,
    /// Trace ids, oldest first.
    order: VecDeque<String>,
}

impl TraceStore {
    /// Drop up to `count` of the oldest completed traces. Open ones stay.
    fn prune_ended(&mut self, count: usize) {
        let TraceStore { by_id, order } = self;
        let mut removed = 0;
        order.retain(|id| {
            if removed >= count {
                return true;
            }
            let ended = by_id
                .get(id)
                .is_some_and(|trace| lock(trace).ended_at.is_some());
            if ended {
                by_id.remove(id);
                removed += 1;
            }
            !ended
        });
    }
}

fn lock(trace: &Mutex<Trace>) -> MutexGuard<'_, Trace> {
    trace.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The core telemetry engine.
pub struct TelemetryEngine {
    enabled: bool,
    max_traces: usize,
    traces: RwLock<TraceStore>,
    /// Running totals.
    totals: RwLock<UsageSnapshot>,
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self::with_max_traces(MAX_TRACES)
    }

    /// An engine that starts pruning once `max_traces` are held.
    pub fn with_max_traces(max_traces: usize) -> Self {
        Self {
            enabled: true,
            max_traces: max_traces.max(1),
            traces: RwLock::new(TraceStore::default()),
            totals: RwLock::new(UsageSnapshot::default()),
        }
    }

    /// An engine that accepts and drops everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn trace(&self, trace_id: &str) -> Option<Arc<Mutex<Trace>>> {
        let store = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        store.by_id.get(trace_id).cloned()
    }

    // ── Trace management ──────────────────────────────────────────────

    /// Start a new trace for one request.
    pub fn start_trace(&self, conversation_id: impl Into<String>) -> String {
        let trace = Trace::new(conversation_id);
        let id = trace.id.clone();
        if !self.enabled {
            return id;
        }
        let mut store = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        if store.order.len() >= self.max_traces {
            store.prune_ended((self.max_traces / 10).max(1));
        }
        store.order.push_back(id.clone());
        store.by_id.insert(id.clone(), Arc::new(Mutex::new(trace)));
        id
    }

    pub fn end_trace(&self, trace_id: &str) {
        if !self.enabled {
            return;
        }
        if let Some(trace) = self.trace(trace_id) {
            lock(&trace).end();
        }
    }

    /// Record a completed span in a trace and update running totals.
    pub fn record_span(&self, trace_id: &str, span: Span) {
        if !self.enabled {
            return;
        }
        {
            let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
            totals.total_input_tokens += span.input_tokens.unwrap_or(0) as u64;
            totals.total_output_tokens += span.output_tokens.unwrap_or(0) as u64;
            let failed = span.success == Some(false);
            match span.kind {
                SpanKind::LlmCall => totals.total_llm_calls += 1,
                SpanKind::ToolExecution => {
                    totals.total_tool_executions += 1;
                    if failed {
                        totals.failed_tool_executions += 1;
                    }
                }
                SpanKind::Verification => {
                    totals.total_verifications += 1;
                    if failed {
                        totals.failed_verifications += 1;
                    }
                }
                SpanKind::Compaction => totals.total_compactions += 1,
                SpanKind::Turn | SpanKind::Phase => {}
            }
        }

        if let Some(trace) = self.trace(trace_id) {
            lock(&trace).add_span(span);
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.trace(trace_id).map(|trace| lock(&trace).clone())
    }

    /// List recent traces (most recent first).
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        let store = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        store
            .order
            .iter()
            .rev()
            .filter_map(|id| store.by_id.get(id))
            .take(limit)
            .map(|trace| lock(trace).clone())
            .collect()
    }

    pub fn traces_for_conversation(&self, conversation_id: &str) -> Vec<Trace> {
        let store = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        store
            .order
            .iter()
            .filter_map(|id| store.by_id.get(id))
            .map(|trace| lock(trace).clone())
            .filter(|t| t.conversation_id == conversation_id)
            .collect()
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.totals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}
