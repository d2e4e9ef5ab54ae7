//! Cache store manager implementation

use futures::future::try_join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use werehouse_proxy::{Fetcher, ProxyError};
use werehouse_storage::{CacheStorage, FetchRequest, FetchResponse};

use super::stats::CacheStats;
use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::strategy::{Route, Strategy, StrategyRouter};

/// State shared with background refresh tasks
struct Shared {
    namespace: String,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    stats: RwLock<CacheStats>,
}

impl Shared {
    /// Look a request up in the current namespace
    ///
    /// A failing store is treated as a miss so the request can still be
    /// answered from the network.
    async fn lookup(&self, request: &FetchRequest) -> Option<FetchResponse> {
        match self.storage.match_request(&self.namespace, request).await {
            Ok(Some(response)) => {
                debug!("Cache hit for {}", request.url);
                self.stats.write().hit_count += 1;
                Some(response)
            }
            Ok(None) => {
                debug!("Cache miss for {}", request.url);
                self.stats.write().miss_count += 1;
                None
            }
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", request.url, e);
                self.stats.write().miss_count += 1;
                None
            }
        }
    }

    /// Fetch from the network, storing the response if it is cacheable
    async fn fetch_and_store(&self, request: &FetchRequest) -> Result<FetchResponse, ProxyError> {
        let response = self.fetcher.fetch(request).await?;

        if !request.has_cacheable_method() {
            debug!("Not caching {} {}", request.method, request.url);
        } else if !response.is_cacheable() {
            debug!(
                "Not caching {} (status {}, redirected: {})",
                request.url, response.status, response.redirected
            );
        } else {
            match self.storage.put(&self.namespace, request, &response).await {
                Ok(()) => {
                    debug!("Cached {} in {}", request.url, self.namespace);
                    self.stats.write().stored_count += 1;
                }
                Err(e) => warn!("Failed to cache {}: {}", request.url, e),
            }
        }

        Ok(response)
    }

    fn error_response(&self) -> FetchResponse {
        self.stats.write().error_count += 1;
        FetchResponse::network_error()
    }
}

/// Cache store manager owning the single current namespace
pub struct CacheStoreManager {
    config: WorkerConfig,
    router: StrategyRouter,
    shared: Arc<Shared>,
    tasks: TaskTracker,
}

impl CacheStoreManager {
    /// Create a new cache store manager
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let namespace = config.namespace.to_string();
        info!(
            "Initializing cache store manager (namespace: {}, precache: {} paths, precache strategy: {}, unmatched: {})",
            namespace,
            config.precache.len(),
            config.precache_strategy,
            config.unmatched.as_str()
        );

        Self {
            router: StrategyRouter::new(&config),
            config,
            shared: Arc::new(Shared {
                namespace,
                storage,
                fetcher,
                stats: RwLock::new(CacheStats::default()),
            }),
            tasks: TaskTracker::new(),
        }
    }

    /// Name of the current namespace
    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.shared.stats.read().clone()
    }

    /// Tracker holding background refreshes; clones share the same task set
    pub fn task_tracker(&self) -> TaskTracker {
        self.tasks.clone()
    }

    /// Wait until every background refresh started so far has finished
    ///
    /// Reopens the tracker afterwards, so it must not race with
    /// `WorkerHost::shutdown`.
    #[cfg(test)]
    pub(crate) async fn wait_for_background_tasks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Open the current namespace and store every precache path
    ///
    /// All paths are fetched before anything is written; if one of them fails
    /// or is not cacheable, nothing from the batch is stored. A failed write
    /// empties the namespace again so no partial batch survives.
    pub async fn precache(&self) -> Result<(), CoreError> {
        let namespace = self.namespace();
        self.shared.storage.open(namespace).await?;

        let requests = self
            .config
            .precache
            .iter()
            .map(|path| -> Result<_, CoreError> {
                Ok((path.as_str(), FetchRequest::get(self.config.resolve(path)?)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!("Precaching {} paths into {}", requests.len(), namespace);

        let responses = try_join_all(requests.iter().map(|(path, request)| async move {
            let response =
                self.shared
                    .fetcher
                    .fetch(request)
                    .await
                    .map_err(|e| CoreError::Precache {
                        path: path.to_string(),
                        reason: e.to_string(),
                    })?;

            if !response.is_cacheable() {
                return Err(CoreError::Precache {
                    path: path.to_string(),
                    reason: if response.redirected {
                        "response was redirected".to_string()
                    } else {
                        format!("status {}", response.status)
                    },
                });
            }

            Ok(response)
        }))
        .await?;

        for ((path, request), response) in requests.iter().zip(&responses) {
            if let Err(e) = self.shared.storage.put(namespace, request, response).await {
                warn!("Failed to store precached {}: {}, discarding batch", path, e);
                self.discard_namespace().await;
                return Err(e.into());
            }
        }
        self.shared.stats.write().stored_count += responses.len() as u64;

        info!("Precached {} paths into {}", responses.len(), namespace);
        Ok(())
    }

    /// Replace the current namespace with an empty one
    async fn discard_namespace(&self) {
        let namespace = self.namespace();
        if let Err(e) = self.shared.storage.delete(namespace).await {
            warn!("Failed to discard namespace {}: {}", namespace, e);
        }
        if let Err(e) = self.shared.storage.open(namespace).await {
            warn!("Failed to reopen namespace {}: {}", namespace, e);
        }
    }

    /// Delete every namespace, the current one included, then precache again
    pub async fn reset_cache(&self) -> Result<(), CoreError> {
        let names = self.shared.storage.keys().await?;
        info!("Resetting cache: deleting {} namespaces", names.len());

        for name in &names {
            debug!("Deleting namespace {}", name);
            self.shared.storage.delete(name).await?;
        }

        self.precache().await
    }

    /// Classify a request path
    pub fn classify(&self, path: &str) -> Route {
        self.router.classify(path)
    }

    /// Resolve a request with the strategy its path selects
    ///
    /// Returns `None` when the router declines the request.
    pub async fn handle(&self, request: &FetchRequest) -> Option<FetchResponse> {
        let matched = self.router.find_match(request.path());
        match matched.route {
            Route::Decline => {
                debug!("Declining {} ({} rule)", request.url, matched.rule);
                None
            }
            Route::Respond(strategy) => {
                debug!(
                    "Handling {} with {} ({} rule)",
                    request.url, strategy, matched.rule
                );
                Some(self.respond_with(strategy, request).await)
            }
        }
    }

    /// Resolve a request with a specific strategy
    pub async fn respond_with(&self, strategy: Strategy, request: &FetchRequest) -> FetchResponse {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::CacheFirstWithRefresh => self.cache_first_with_refresh(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
        }
    }

    /// Serve from the namespace; fetch and store only on a miss
    pub async fn cache_first(&self, request: &FetchRequest) -> FetchResponse {
        if let Some(cached) = self.shared.lookup(request).await {
            return cached;
        }

        match self.shared.fetch_and_store(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Network fetch for {} failed: {}", request.url, e);
                self.shared.error_response()
            }
        }
    }

    /// Serve from the namespace while refreshing it from the network
    ///
    /// The network fetch starts before the cache lookup and runs as a tracked
    /// task, so a hit is returned at once and the refresh still lands in the
    /// namespace for the next request.
    pub async fn cache_first_with_refresh(&self, request: &FetchRequest) -> FetchResponse {
        let shared = Arc::clone(&self.shared);
        let owned = request.clone();
        let refresh = self.tasks.spawn(async move {
            let result = shared.fetch_and_store(&owned).await;
            if let Err(ref e) = result {
                debug!("Refresh of {} failed: {}", owned.url, e);
            }
            result
        });

        if let Some(cached) = self.shared.lookup(request).await {
            self.shared.stats.write().refresh_count += 1;
            return cached;
        }

        match refresh.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Network fetch for {} failed: {}", request.url, e);
                self.shared.error_response()
            }
            Err(e) => {
                warn!("Refresh task for {} did not complete: {}", request.url, e);
                self.shared.error_response()
            }
        }
    }

    /// Prefer the network; fall back to the namespace when it fails
    pub async fn network_first(&self, request: &FetchRequest) -> FetchResponse {
        match self.shared.fetch_and_store(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Network fetch for {} failed: {}, trying cache", request.url, e);
                match self.shared.lookup(request).await {
                    Some(cached) => {
                        self.shared.stats.write().fallback_count += 1;
                        cached
                    }
                    None => self.shared.error_response(),
                }
            }
        }
    }
}
