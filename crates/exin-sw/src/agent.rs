//! The offline agent: lifecycle handlers and fetch strategies.
//!
//! Every network and cache-storage call is a suspension point. Nothing is
//! cancelled once started; background writes and refreshes are detached
//! tasks whose outcome is discarded.

use std::future::Future;
use std::sync::Arc;

use exin_net::{Network, Request, Response};
use futures::future::try_join_all;
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::ClientRegistry;
use crate::config::AgentConfig;
use crate::lifecycle::WorkerState;
use crate::strategy::{classify, is_same_origin, RequestKind};
use crate::AgentError;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Bucket that was populated.
    pub cache_name: String,
    /// Precached URLs, in manifest order.
    pub cached: Vec<Url>,
    /// Whether the host should activate without waiting.
    pub skip_waiting: bool,
}

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    /// Buckets that were deleted.
    pub deleted: Vec<String>,
    /// Clients that switched to this agent.
    pub claimed: usize,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    OfflineFallback,
}

/// A response handed back to the host.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,
    pub source: ResponseSource,
}

/// Outcome of intercepting a request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not handled; the host applies its default behaviour.
    Passthrough,
    /// Answer with this response.
    Respond(FetchResponse),
}

impl FetchOutcome {
    /// The response, if the request was handled.
    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Respond(r) => Some(r),
        }
    }
}

/// Offline cache agent for one version of the app.
///
/// Cache writes and refreshes after a response are spawned onto the current
/// Tokio runtime. When `handle_fetch` is polled outside one, that work is
/// skipped and the response is still returned.
pub struct OfflineAgent<S, N, R> {
    config: Arc<AgentConfig>,
    caches: Arc<S>,
    network: Arc<N>,
    clients: Arc<R>,
    state: RwLock<WorkerState>,
}

impl<S, N, R> OfflineAgent<S, N, R>
where
    S: CacheStorage + 'static,
    N: Network + 'static,
    R: ClientRegistry + 'static,
{
    /// Create an agent. The configuration is validated up front.
    pub fn new(
        config: AgentConfig,
        caches: Arc<S>,
        network: Arc<N>,
        clients: Arc<R>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            caches,
            network,
            clients,
            state: RwLock::new(WorkerState::Parsed),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        debug!(cache = %self.config.cache_name, %state, "Agent state changed");
    }

    /// Move from `expected` to `next` under one write guard.
    async fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<(), AgentError> {
        let mut state = self.state.write().await;
        if *state != expected {
            return Err(AgentError::State {
                expected,
                actual: *state,
            });
        }
        *state = next;
        debug!(cache = %self.config.cache_name, state = %next, "Agent state changed");
        Ok(())
    }

    // ==================== Install ====================

    /// Precache the manifest into the current bucket.
    ///
    /// All-or-nothing: one failed fetch or non-2xx response fails the
    /// install, stores nothing, and makes the agent redundant.
    pub async fn install(&self) -> Result<InstallReport, AgentError> {
        self.transition(WorkerState::Parsed, WorkerState::Installing).await?;

        match self.precache().await {
            Ok(cached) => {
                self.set_state(WorkerState::Installed).await;
                info!(
                    cache = %self.config.cache_name,
                    assets = cached.len(),
                    "Install complete"
                );
                Ok(InstallReport {
                    cache_name: self.config.cache_name.clone(),
                    cached,
                    skip_waiting: self.config.skip_waiting,
                })
            }
            Err(e) => {
                warn!(cache = %self.config.cache_name, error = %e, "Install failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<Vec<Url>, AgentError> {
        let name = &self.config.cache_name;
        self.caches.open(name).await?;

        let fetches = self.config.asset_urls()?.into_iter().map(|url| {
            let network = Arc::clone(&self.network);
            async move {
                let request = Request::get(url.clone());
                let response = network
                    .fetch(request.clone())
                    .await
                    .map_err(|e| AgentError::Install {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                if !response.ok() {
                    return Err(AgentError::Install {
                        url,
                        reason: format!("bad status {}", response.status),
                    });
                }
                Ok::<_, AgentError>((request, response))
            }
        });
        let pairs = try_join_all(fetches).await?;

        self.caches.put_all(name, &pairs).await?;
        Ok(pairs.into_iter().map(|(request, _)| request.url).collect())
    }

    // ==================== Activate ====================

    /// Delete every bucket but the current one, then claim open clients.
    pub async fn activate(&self) -> Result<ActivateReport, AgentError> {
        self.transition(WorkerState::Installed, WorkerState::Activating).await?;

        match self.purge_and_claim().await {
            Ok(report) => {
                self.set_state(WorkerState::Activated).await;
                info!(
                    cache = %self.config.cache_name,
                    deleted = report.deleted.len(),
                    claimed = report.claimed,
                    "Activation complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(cache = %self.config.cache_name, error = %e, "Activation failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn purge_and_claim(&self) -> Result<ActivateReport, AgentError> {
        let current = &self.config.cache_name;

        let mut deleted = Vec::new();
        for name in self.caches.keys().await? {
            if &name != current && self.caches.delete(&name).await? {
                deleted.push(name);
            }
        }

        let claimed = if self.config.claim_clients {
            self.clients.claim(&self.config.scope, current).await?
        } else {
            0
        };

        Ok(ActivateReport { deleted, claimed })
    }

    // ==================== Fetch ====================

    /// Answer an intercepted request.
    ///
    /// Cross-origin requests pass through. Documents go network-first,
    /// everything else cache-first.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome, AgentError> {
        if !is_same_origin(&self.config.scope, &request.url) {
            trace!(url = %request.url, "Cross-origin request, passing through");
            return Ok(FetchOutcome::Passthrough);
        }

        let kind = classify(&request);
        trace!(request = request.id.raw(), url = %request.url, ?kind, "Intercepted request");

        let response = match kind {
            RequestKind::Document => self.network_first(request).await?,
            RequestKind::Asset => self.cache_first(request).await?,
        };
        Ok(FetchOutcome::Respond(response))
    }

    async fn network_first(&self, request: Request) -> Result<FetchResponse, AgentError> {
        match self.network.fetch(request.clone()).await {
            Ok(response) => {
                self.store_in_background(request, response.clone());
                Ok(FetchResponse {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Document fetch failed, trying offline copy");
                let fallback = Request::get(self.config.offline_document_url()?);
                match self.caches.match_request(&fallback).await? {
                    Some(response) => Ok(FetchResponse {
                        response,
                        source: ResponseSource::OfflineFallback,
                    }),
                    None => Err(AgentError::Offline { url: request.url }),
                }
            }
        }
    }

    async fn cache_first(&self, request: Request) -> Result<FetchResponse, AgentError> {
        if let Some(cached) = self.caches.match_request(&request).await? {
            self.refresh_in_background(request);
            return Ok(FetchResponse {
                response: cached,
                source: ResponseSource::Cache,
            });
        }

        match self.network.fetch(request.clone()).await {
            Ok(response) => {
                self.store_in_background(request, response.clone());
                Ok(FetchResponse {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset fetch failed with nothing cached");
                Err(AgentError::Offline { url: request.url })
            }
        }
    }

    /// Best-effort write of a network response; failures are logged and dropped.
    fn store_in_background(&self, request: Request, response: Response) {
        let caches = Arc::clone(&self.caches);
        let name = self.config.cache_name.clone();
        detach(async move {
            store(caches.as_ref(), &name, &request, &response).await;
        });
    }

    /// Fetch again and overwrite the cached copy for next time.
    fn refresh_in_background(&self, request: Request) {
        let caches = Arc::clone(&self.caches);
        let network = Arc::clone(&self.network);
        let name = self.config.cache_name.clone();
        detach(async move {
            match network.fetch(request.clone()).await {
                Ok(response) => store(caches.as_ref(), &name, &request, &response).await,
                Err(e) => debug!(url = %request.url, error = %e, "Background refresh failed"),
            }
        });
    }
}

/// Spawn fire-and-forget work on the current runtime, if there is one.
fn detach<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => debug!("No Tokio runtime, dropping background cache work"),
    }
}

async fn store<S: CacheStorage + ?Sized>(caches: &S, name: &str, request: &Request, response: &Response) {
    match caches.put(name, request, response).await {
        Ok(()) => trace!(cache = %name, url = %request.url, "Cached response"),
        Err(e) => debug!(cache = %name, url = %request.url, error = %e, "Cache write failed, ignoring"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::clients::MemoryClients;
    use async_trait::async_trait;
    use exin_net::NetError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Serves `"<path> body"` for every URL unless switched offline.
    #[derive(Default)]
    struct EchoNetwork {
        offline: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Network for EchoNetwork {
        async fn fetch(&self, request: Request) -> Result<Response, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetError::Offline(request.url));
            }
            let body = format!("{} body", request.url.path());
            Ok(Response::ok_with(request.url, "text/plain", body))
        }
    }

    type TestAgent = OfflineAgent<MemoryCacheStorage, EchoNetwork, MemoryClients>;

    fn agent(assets: &[&str]) -> (TestAgent, Arc<MemoryCacheStorage>, Arc<EchoNetwork>) {
        let scope = Url::parse("https://exin.example/").unwrap();
        let config = AgentConfig::new(scope).with_assets(assets.iter().copied());
        let caches = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(EchoNetwork::default());
        let agent = OfflineAgent::new(
            config,
            Arc::clone(&caches),
            Arc::clone(&network),
            Arc::new(MemoryClients::new()),
        )
        .unwrap();
        (agent, caches, network)
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = AgentConfig::new(Url::parse("https://exin.example/").unwrap()).with_cache_name("");
        let result = OfflineAgent::new(
            config,
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(EchoNetwork::default()),
            Arc::new(MemoryClients::new()),
        );
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_install_reports_manifest_order() {
        let (agent, _, _) = agent(&["./", "./index.html"]);
        let report = agent.install().await.unwrap();

        assert_eq!(report.cache_name, "exin-cache-v5");
        assert!(report.skip_waiting);
        assert_eq!(
            report.cached.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec!["https://exin.example/", "https://exin.example/index.html"]
        );
        assert_eq!(agent.state().await, WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_install_twice_is_a_state_error() {
        let (agent, _, _) = agent(&["./"]);
        agent.install().await.unwrap();
        assert!(matches!(
            agent.install().await,
            Err(AgentError::State {
                expected: WorkerState::Parsed,
                actual: WorkerState::Installed
            })
        ));
    }

    #[tokio::test]
    async fn test_install_offline_makes_agent_redundant() {
        let (agent, caches, network) = agent(&["./", "./index.html"]);
        network.offline.store(true, Ordering::SeqCst);

        assert!(matches!(agent.install().await, Err(AgentError::Install { .. })));
        assert_eq!(agent.state().await, WorkerState::Redundant);
        assert!(caches.entries("exin-cache-v5").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_installs_run_once() {
        let (agent, _, network) = agent(&["./", "./index.html"]);

        let (first, second) = tokio::join!(agent.install(), agent.install());
        let results = [first, second];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(AgentError::State {
                expected: WorkerState::Parsed,
                ..
            })
        )));
        assert_eq!(network.calls.load(Ordering::SeqCst), 2);
        assert_eq!(agent.state().await, WorkerState::Installed);
    }

    #[test]
    fn test_fetch_outside_runtime_still_responds() {
        let (agent, caches, _) = agent(&["./"]);
        let request = Request::get(Url::parse("https://exin.example/app.js").unwrap());

        let response = futures::executor::block_on(agent.handle_fetch(request))
            .unwrap()
            .into_response()
            .unwrap();

        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.response.text().unwrap(), "/app.js body");
        assert!(futures::executor::block_on(caches.keys()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let (agent, _, _) = agent(&["./"]);
        assert!(matches!(agent.activate().await, Err(AgentError::State { .. })));
    }

    #[tokio::test]
    async fn test_cross_origin_passes_through() {
        let (agent, _, network) = agent(&["./"]);
        let request = Request::get(Url::parse("https://cdn.example/chart.js").unwrap());

        let outcome = agent.handle_fetch(request).await.unwrap();
        assert!(outcome.into_response().is_none());
        assert_eq!(network.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_asset_miss_goes_to_network() {
        let (agent, _, _) = agent(&["./"]);
        let request = Request::get(Url::parse("https://exin.example/app.js").unwrap());

        let response = agent
            .handle_fetch(request)
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.response.text().unwrap(), "/app.js body");
    }

    #[tokio::test]
    async fn test_document_offline_without_fallback_fails() {
        let (agent, _, network) = agent(&["./"]);
        network.offline.store(true, Ordering::SeqCst);
        let request = Request::navigate(Url::parse("https://exin.example/reports").unwrap());

        assert!(matches!(
            agent.handle_fetch(request).await,
            Err(AgentError::Offline { .. })
        ));
    }
}
