//! Worker lifecycle host
//!
//! Install, activate and fetch are explicit async callbacks. The host awaits
//! each phase before moving on, so "extend lifetime until this completes" is
//! simply the future the host is awaiting. Work that outlives a response
//! (background refreshes) is tracked by a `TaskTracker` that `shutdown` drains.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use werehouse_storage::{FetchRequest, FetchResponse};

use crate::cache::CacheStoreManager;
use crate::error::CoreError;

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// A phase failed; the worker never handles requests
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of dispatching a fetch to the worker
#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker supplied a response
    Respond(FetchResponse),
    /// The worker stayed out of the way; use default network handling
    Decline,
}

/// Lifecycle callbacks a worker registers with its host
#[async_trait]
pub trait WorkerHooks: Send + Sync {
    /// Runs once when the worker is first loaded
    async fn on_install(&self) -> Result<(), CoreError>;

    /// Runs when the worker takes control, before it handles requests
    async fn on_activate(&self) -> Result<(), CoreError>;

    /// Runs for every intercepted request
    async fn on_fetch(&self, request: &FetchRequest) -> FetchOutcome;
}

/// Worker backed by the cache store manager
pub struct CacheWorker {
    manager: Arc<CacheStoreManager>,
}

impl CacheWorker {
    pub fn new(manager: Arc<CacheStoreManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<CacheStoreManager> {
        &self.manager
    }
}

#[async_trait]
impl WorkerHooks for CacheWorker {
    async fn on_install(&self) -> Result<(), CoreError> {
        self.manager.precache().await
    }

    async fn on_activate(&self) -> Result<(), CoreError> {
        self.manager.reset_cache().await
    }

    async fn on_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        match self.manager.handle(request).await {
            Some(response) => FetchOutcome::Respond(response),
            None => FetchOutcome::Decline,
        }
    }
}

/// Drives a worker through its lifecycle
pub struct WorkerHost<H: WorkerHooks> {
    hooks: H,
    state: RwLock<WorkerState>,
    tasks: TaskTracker,
}

impl WorkerHost<CacheWorker> {
    /// Host a cache worker, sharing the manager's background task tracker
    pub fn for_manager(manager: Arc<CacheStoreManager>) -> Self {
        let tasks = manager.task_tracker();
        Self::new(CacheWorker::new(manager), tasks)
    }
}

impl<H: WorkerHooks> WorkerHost<H> {
    pub fn new(hooks: H, tasks: TaskTracker) -> Self {
        Self {
            hooks,
            state: RwLock::new(WorkerState::Parsed),
            tasks,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Move from `expected` to `next`, failing if the worker is elsewhere
    fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<(), CoreError> {
        let mut state = self.state.write();
        if *state != expected {
            return Err(CoreError::InvalidState {
                expected,
                actual: *state,
            });
        }
        debug!("Worker {} -> {}", *state, next);
        *state = next;
        Ok(())
    }

    fn set_state(&self, next: WorkerState) {
        *self.state.write() = next;
    }

    /// Run the install phase to completion
    ///
    /// A failed install makes the worker redundant, so an incomplete cache
    /// is never activated.
    pub async fn install(&self) -> Result<(), CoreError> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)?;
        info!("Installing worker");

        match self.hooks.on_install().await {
            Ok(()) => {
                self.set_state(WorkerState::Installed);
                info!("Worker installed");
                Ok(())
            }
            Err(e) => {
                error!("Worker install failed: {}", e);
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Run the activate phase to completion
    pub async fn activate(&self) -> Result<(), CoreError> {
        self.transition(WorkerState::Installed, WorkerState::Activating)?;
        info!("Activating worker");

        match self.hooks.on_activate().await {
            Ok(()) => {
                self.set_state(WorkerState::Activated);
                info!("Worker activated");
                Ok(())
            }
            Err(e) => {
                error!("Worker activation failed: {}", e);
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Install then activate
    pub async fn start(&self) -> Result<(), CoreError> {
        self.install().await?;
        self.activate().await
    }

    /// Dispatch an intercepted request
    ///
    /// Only an activated worker intercepts; otherwise the request declines.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let state = self.state();
        if state != WorkerState::Activated {
            debug!("Worker is {}, declining {}", state, request.url);
            return FetchOutcome::Decline;
        }
        self.hooks.on_fetch(request).await
    }

    /// Wait for all outstanding background work to finish
    pub async fn shutdown(&self) {
        info!("Waiting for {} background tasks", self.tasks.len());
        self.tasks.close();
        self.tasks.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use url::Url;

    /// Hooks that record calls and can be told to fail
    #[derive(Default)]
    struct RecordingHooks {
        fail_install: AtomicBool,
        fail_activate: AtomicBool,
        installs: AtomicUsize,
        activations: AtomicUsize,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl WorkerHooks for RecordingHooks {
        async fn on_install(&self) -> Result<(), CoreError> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            if self.fail_install.load(Ordering::SeqCst) {
                return Err(CoreError::Precache {
                    path: "/home".to_string(),
                    reason: "status 500".to_string(),
                });
            }
            Ok(())
        }

        async fn on_activate(&self) -> Result<(), CoreError> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            if self.fail_activate.load(Ordering::SeqCst) {
                return Err(CoreError::Config("boom".to_string()));
            }
            Ok(())
        }

        async fn on_fetch(&self, _request: &FetchRequest) -> FetchOutcome {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            FetchOutcome::Respond(FetchResponse::new(StatusCode::OK, "from worker"))
        }
    }

    fn request() -> FetchRequest {
        FetchRequest::get(Url::parse("http://localhost:8080/home").unwrap())
    }

    #[tokio::test]
    async fn test_lifecycle_happy_path() {
        let host = WorkerHost::new(RecordingHooks::default(), TaskTracker::new());
        assert_eq!(host.state(), WorkerState::Parsed);

        // Not yet activated: requests go to the network
        assert!(matches!(host.fetch(&request()).await, FetchOutcome::Decline));
        assert_eq!(host.hooks().fetches.load(Ordering::SeqCst), 0);

        host.start().await.unwrap();
        assert_eq!(host.state(), WorkerState::Activated);

        match host.fetch(&request()).await {
            FetchOutcome::Respond(response) => assert_eq!(&response.body[..], b"from worker"),
            FetchOutcome::Decline => panic!("activated worker declined"),
        }

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant() {
        let hooks = RecordingHooks::default();
        hooks.fail_install.store(true, Ordering::SeqCst);
        let host = WorkerHost::new(hooks, TaskTracker::new());

        assert!(matches!(host.start().await, Err(CoreError::Precache { .. })));
        assert_eq!(host.state(), WorkerState::Redundant);
        assert_eq!(host.hooks().activations.load(Ordering::SeqCst), 0);

        assert!(matches!(
            host.activate().await,
            Err(CoreError::InvalidState {
                expected: WorkerState::Installed,
                actual: WorkerState::Redundant
            })
        ));
        assert!(matches!(host.fetch(&request()).await, FetchOutcome::Decline));
    }

    #[tokio::test]
    async fn test_failed_activate_is_redundant() {
        let hooks = RecordingHooks::default();
        hooks.fail_activate.store(true, Ordering::SeqCst);
        let host = WorkerHost::new(hooks, TaskTracker::new());

        assert!(host.start().await.is_err());
        assert_eq!(host.state(), WorkerState::Redundant);
        assert!(matches!(host.fetch(&request()).await, FetchOutcome::Decline));
    }

    #[tokio::test]
    async fn test_install_runs_once() {
        let host = WorkerHost::new(RecordingHooks::default(), TaskTracker::new());
        host.install().await.unwrap();
        assert!(matches!(
            host.install().await,
            Err(CoreError::InvalidState { .. })
        ));
        assert_eq!(host.hooks().installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_tracked_tasks() {
        let tasks = TaskTracker::new();
        let host = WorkerHost::new(RecordingHooks::default(), tasks.clone());
        let done = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&done);
        tasks.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        host.shutdown().await;
        assert!(done.load(Ordering::SeqCst));
    }
}
