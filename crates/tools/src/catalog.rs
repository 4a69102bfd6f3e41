//! Dynamic tool catalog.
//!
//! Tool schemas arrive at runtime from each [`ToolProvider`]. The catalog
//! keeps the discovered set as an immutable [`CatalogSnapshot`] and swaps
//! in a new one after each full refresh, so readers never observe a
//! half-built list.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use cairn_core::error::ToolError;
use cairn_core::provider::ToolDefinition;
use cairn_core::tool::{ToolKey, ToolProvider};
use tracing::{debug, info, warn};

use crate::health::{HealthStatus, HealthTracker};

/// Appended to the description of tools from a degraded provider.
pub const DEGRADED_HINT: &str =
    "(This tool has been unreliable recently; prefer other sources when possible.)";

/// One discovered tool.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub key: ToolKey,
    /// The definition as the provider reported it (unqualified name).
    pub definition: ToolDefinition,
}

impl CatalogEntry {
    /// The definition as offered to the model (qualified name).
    pub fn offered_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.key.qualified(),
            description: self.definition.description.clone(),
            parameters: self.definition.parameters.clone(),
        }
    }
}

/// An immutable view of every discovered tool.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub entries: Vec<CatalogEntry>,
    refreshed_at: Option<Instant>,
}

impl CatalogSnapshot {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            refreshed_at: None,
        }
    }

    pub fn get(&self, key: &ToolKey) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    fn provider_entries(&self, provider: &str) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(move |e| e.key.provider == provider)
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.refreshed_at.is_none_or(|at| at.elapsed() >= ttl)
    }
}

/// The tool list for one provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfferedTools {
    /// Healthy tools first, then demoted ones.
    pub definitions: Vec<ToolDefinition>,
    /// Providers left out because they are unhealthy.
    pub excluded_providers: Vec<String>,
}

pub struct ToolCatalog {
    providers: Vec<Arc<dyn ToolProvider>>,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
    ttl: Duration,
    discovery_timeout: Duration,
}

impl ToolCatalog {
    pub fn new(ttl: Duration, discovery_timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::empty())),
            refresh_lock: tokio::sync::Mutex::new(()),
            ttl,
            discovery_timeout,
        }
    }

    /// Register a provider. Its tools show up after the next refresh.
    pub fn with_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn ToolProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// The current snapshot, without refreshing.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rediscover every provider's tools and swap in a new snapshot.
    ///
    /// A provider whose discovery fails keeps the tools it had before, and
    /// the failure counts against its health.
    pub async fn refresh(&self, tracker: &HealthTracker) -> Arc<CatalogSnapshot> {
        let _guard = self.refresh_lock.lock().await;
        self.rediscover(tracker).await
    }

    /// Caller holds `refresh_lock`.
    async fn rediscover(&self, tracker: &HealthTracker) -> Arc<CatalogSnapshot> {
        let previous = self.snapshot();
        let mut entries = Vec::new();

        for provider in &self.providers {
            let name = provider.name();
            let discovered = match tokio::time::timeout(self.discovery_timeout, provider.list_tools())
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ToolError::Unavailable {
                    provider: name.to_string(),
                    reason: format!(
                        "discovery timed out after {}s",
                        self.discovery_timeout.as_secs()
                    ),
                }),
            };

            match discovered {
                Ok(definitions) => {
                    debug!(provider = name, tools = definitions.len(), "Discovered tools");
                    entries.extend(definitions.into_iter().map(|definition| CatalogEntry {
                        key: ToolKey::new(name, definition.name.clone()),
                        definition,
                    }));
                }
                Err(e) => {
                    tracker.mark_failure(name);
                    warn!(provider = name, "Tool discovery failed, keeping previous tools: {e}");
                    entries.extend(previous.provider_entries(name).cloned());
                }
            }
        }

        let next = Arc::new(CatalogSnapshot {
            entries,
            refreshed_at: Some(Instant::now()),
        });
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);
        info!(tools = next.entries.len(), "Tool catalog refreshed");
        next
    }

    /// The snapshot, refreshed first if it is older than the TTL.
    ///
    /// Concurrent callers that find it stale share one rediscovery.
    pub async fn current(&self, tracker: &HealthTracker) -> Arc<CatalogSnapshot> {
        let snapshot = self.snapshot();
        if !snapshot.is_stale(self.ttl) {
            return snapshot;
        }

        let _guard = self.refresh_lock.lock().await;
        // Someone else may have refreshed while we waited
        let snapshot = self.snapshot();
        if snapshot.is_stale(self.ttl) {
            self.rediscover(tracker).await
        } else {
            snapshot
        }
    }

    /// Resolve a qualified name from the model to its provider and key.
    pub fn resolve(&self, qualified: &str) -> Option<(Arc<dyn ToolProvider>, ToolKey)> {
        let key = ToolKey::parse(qualified)?;
        self.snapshot().get(&key)?;
        let provider = self.provider(&key.provider)?;
        Some((provider, key))
    }

    /// Build the tool list for the next provider call, ordered by health.
    pub async fn offered_tools(&self, tracker: &HealthTracker) -> OfferedTools {
        let snapshot = self.current(tracker).await;
        let mut healthy = Vec::new();
        let mut demoted = Vec::new();
        let mut excluded = Vec::new();

        for provider in &self.providers {
            let name = provider.name();
            let status = tracker.get(name).status;
            let probing = status == HealthStatus::Unhealthy && tracker.probe_due(name);

            if status == HealthStatus::Unhealthy && !probing {
                excluded.push(name.to_string());
                continue;
            }
            if probing {
                info!(provider = name, "Offering unhealthy tool provider as a probe");
            }

            for entry in snapshot.provider_entries(name) {
                let mut definition = entry.offered_definition();
                if status == HealthStatus::Healthy {
                    healthy.push(definition);
                } else {
                    definition.description = format!("{} {}", definition.description, DEGRADED_HINT);
                    demoted.push(definition);
                }
            }
        }

        healthy.extend(demoted);
        OfferedTools {
            definitions: healthy,
            excluded_providers: excluded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthThresholds;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StaticProvider {
        name: &'static str,
        tools: Vec<&'static str>,
        fail_discovery: AtomicBool,
        list_calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(name: &'static str, tools: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                tools,
                fail_discovery: AtomicBool::new(false),
                list_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ToolProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_discovery.load(Ordering::SeqCst) {
                return Err(ToolError::Unavailable {
                    provider: self.name.into(),
                    reason: "connection refused".into(),
                });
            }
            Ok(self
                .tools
                .iter()
                .map(|t| ToolDefinition {
                    name: (*t).into(),
                    description: format!("{t} tool"),
                    parameters: serde_json::json!({"type": "object"}),
                })
                .collect())
        }

        async fn call_tool(&self, _name: &str, input: Value) -> Result<Value, ToolError> {
            Ok(input)
        }
    }

    fn catalog(providers: &[Arc<StaticProvider>]) -> ToolCatalog {
        providers.iter().fold(
            ToolCatalog::new(Duration::from_secs(300), Duration::from_secs(5)),
            |c, p| c.with_provider(p.clone() as Arc<dyn ToolProvider>),
        )
    }

    fn names(offered: &OfferedTools) -> Vec<&str> {
        offered.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    #[tokio::test]
    async fn offers_qualified_names() {
        let weather = StaticProvider::new("weather", vec!["forecast"]);
        let cat = catalog(&[weather]);
        let tracker = HealthTracker::default();

        let offered = cat.offered_tools(&tracker).await;
        assert_eq!(names(&offered), vec!["weather__forecast"]);
        assert!(offered.excluded_providers.is_empty());
        assert!(cat.resolve("weather__forecast").is_some());
        assert!(cat.resolve("weather__missing").is_none());
    }

    #[tokio::test]
    async fn lazy_refresh_respects_ttl() {
        let weather = StaticProvider::new("weather", vec!["forecast"]);
        let cat = catalog(&[weather.clone()]);
        let tracker = HealthTracker::default();

        cat.offered_tools(&tracker).await;
        cat.offered_tools(&tracker).await;
        assert_eq!(weather.list_calls.load(Ordering::SeqCst), 1);

        cat.refresh(&tracker).await;
        assert_eq!(weather.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_stale_reads_share_one_discovery() {
        let weather = StaticProvider::new("weather", vec!["forecast"]);
        weather.fail_discovery.store(true, Ordering::SeqCst);
        let cat = catalog(&[weather.clone()]);
        let tracker = HealthTracker::default();

        tokio::join!(
            cat.current(&tracker),
            cat.current(&tracker),
            cat.current(&tracker),
            cat.current(&tracker),
        );

        assert_eq!(weather.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.get("weather").consecutive_failures, 1);
    }

    #[tokio::test]
    async fn degraded_providers_are_demoted_and_unhealthy_excluded() {
        let weather = StaticProvider::new("weather", vec!["forecast"]);
        let calendar = StaticProvider::new("calendar", vec!["events"]);
        let search = StaticProvider::new("search", vec!["web"]);
        let cat = catalog(&[weather, calendar, search]);
        let tracker = HealthTracker::new(HealthThresholds {
            probe_after: None,
            ..HealthThresholds::default()
        });
        for _ in 0..2 {
            tracker.mark_failure("weather");
        }
        for _ in 0..3 {
            tracker.mark_failure("calendar");
        }

        let offered = cat.offered_tools(&tracker).await;
        assert_eq!(names(&offered), vec!["search__web", "weather__forecast"]);
        assert!(offered.definitions[1].description.ends_with(DEGRADED_HINT));
        assert_eq!(offered.excluded_providers, vec!["calendar"]);
    }

    #[tokio::test]
    async fn probe_reoffers_unhealthy_provider() {
        let weather = StaticProvider::new("weather", vec!["forecast"]);
        let cat = catalog(&[weather]);
        let tracker = HealthTracker::new(HealthThresholds {
            degraded: 1,
            unhealthy: 1,
            probe_after: Some(Duration::ZERO),
        });
        tracker.mark_failure("weather");

        let offered = cat.offered_tools(&tracker).await;
        assert_eq!(names(&offered), vec!["weather__forecast"]);
        assert!(offered.excluded_providers.is_empty());
    }

    #[tokio::test]
    async fn failed_discovery_keeps_previous_tools() {
        let weather = StaticProvider::new("weather", vec!["forecast"]);
        let cat = catalog(&[weather.clone()]);
        let tracker = HealthTracker::default();

        cat.refresh(&tracker).await;
        weather.fail_discovery.store(true, Ordering::SeqCst);
        let snapshot = cat.refresh(&tracker).await;

        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(tracker.get("weather").consecutive_failures, 1);
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_refresh() {
        let weather = StaticProvider::new("weather", vec!["forecast"]);
        let cat = catalog(&[weather]);
        let tracker = HealthTracker::default();

        let before = cat.snapshot();
        assert!(before.entries.is_empty());
        cat.refresh(&tracker).await;
        assert!(before.entries.is_empty());
        assert_eq!(cat.snapshot().entries.len(), 1);
    }
}
