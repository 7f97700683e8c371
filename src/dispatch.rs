//! Concurrent query dispatch across backend adapters.
//!
//! Adapters are synchronous; each search runs on the blocking pool under a
//! per-backend timeout, with an overall deadline over the whole fan-out.
//! A failed or timed-out backend contributes zero results and a degraded
//! status entry — one bad backend never fails the query. Results are
//! accumulated into shared state as each backend finishes, so hitting the
//! overall deadline still returns whatever arrived in time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::adapters::{SearchAdapter, SearchOptions};
use crate::model::MemoryResult;

/// Which adapters a query fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Vector,
    Graph,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::Hybrid => "hybrid",
        }
    }

    fn includes(&self, adapter_name: &str) -> bool {
        match self {
            Self::Vector => adapter_name != "graph",
            Self::Graph => adapter_name != "vector",
            Self::Hybrid => true,
        }
    }
}

/// Per-backend outcome for one dispatched query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Healthy,
    Degraded,
    Unavailable,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Everything one dispatched query produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub results: Vec<MemoryResult>,
    /// Status per adapter name, in stable (sorted) order.
    pub backend_status: BTreeMap<String, BackendStatus>,
}

fn lock_state(
    state: &Arc<Mutex<DispatchOutcome>>,
) -> std::sync::MutexGuard<'_, DispatchOutcome> {
    // A poisoned guard only means another backend task panicked; the
    // accumulated partial outcome is still valid.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fans a query out over a fixed set of adapters.
pub struct Dispatcher {
    adapters: Vec<Arc<dyn SearchAdapter>>,
    backend_timeout: Duration,
    overall_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        adapters: Vec<Arc<dyn SearchAdapter>>,
        backend_timeout: Duration,
        overall_timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            backend_timeout,
            overall_timeout,
        }
    }

    /// Run the query against every adapter the mode includes. Never returns
    /// an error: backend failures are reported through the status map.
    pub async fn dispatch(
        &self,
        query: &str,
        mode: SearchMode,
        options: &SearchOptions,
    ) -> DispatchOutcome {
        let accumulated: Arc<Mutex<DispatchOutcome>> = Arc::new(Mutex::new(DispatchOutcome {
            results: Vec::new(),
            backend_status: BTreeMap::new(),
        }));

        let mut handles = Vec::new();
        for adapter in &self.adapters {
            if !mode.includes(adapter.name()) {
                continue;
            }
            // Adapters not reached before the overall deadline stay
            // unavailable in the status map.
            lock_state(&accumulated)
                .backend_status
                .insert(adapter.name().to_string(), BackendStatus::Unavailable);

            let adapter = Arc::clone(adapter);
            let accumulated = Arc::clone(&accumulated);
            let query = query.to_string();
            let options = options.clone();
            let backend_timeout = self.backend_timeout;

            handles.push(tokio::spawn(async move {
                let name = adapter.name();
                let search = tokio::task::spawn_blocking(move || adapter.search(&query, &options));
                let outcome = tokio::time::timeout(backend_timeout, search).await;

                let (status, results) = match outcome {
                    Ok(Ok(Ok(results))) => (BackendStatus::Healthy, results),
                    Ok(Ok(Err(err))) => {
                        warn!(backend = name, error = %err, "backend search failed");
                        (BackendStatus::Degraded, Vec::new())
                    }
                    Ok(Err(join_err)) => {
                        warn!(backend = name, error = %join_err, "backend task panicked");
                        (BackendStatus::Degraded, Vec::new())
                    }
                    Err(_) => {
                        warn!(
                            backend = name,
                            timeout_ms = backend_timeout.as_millis() as u64,
                            "backend search timed out"
                        );
                        (BackendStatus::Unavailable, Vec::new())
                    }
                };

                let mut state = lock_state(&accumulated);
                state.backend_status.insert(name.to_string(), status);
                state.results.extend(results);
            }));
        }

        let all = async {
            for handle in handles {
                // The inner task never errors; a join error means it panicked
                // after already recording its status fallback.
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.overall_timeout, all).await.is_err() {
            warn!(
                timeout_ms = self.overall_timeout.as_millis() as u64,
                "overall dispatch deadline hit; returning partial results"
            );
        }

        let state = lock_state(&accumulated);
        state.clone()
    }

    /// Health of every adapter, independent of any query.
    pub fn health(&self) -> BTreeMap<String, BackendStatus> {
        self.adapters
            .iter()
            .map(|adapter| {
                let status = match adapter.health_check() {
                    Ok(()) => BackendStatus::Healthy,
                    Err(err) => {
                        warn!(backend = adapter.name(), error = %err, "health check failed");
                        BackendStatus::Unavailable
                    }
                };
                (adapter.name().to_string(), status)
            })
            .collect()
    }
}
