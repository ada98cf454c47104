//! Worker lifecycle and the host-side registration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Precaching.
    Installing,
    /// Installed but not yet activated.
    Installed,
    /// Purging old buckets, claiming clients.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or failed to install.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// One version of the agent as the host sees it.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Cache name this worker owns.
    pub version: String,

    /// Current state.
    pub state: WorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            version: version.into(),
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

/// Host-side registration: at most one installing, waiting, and active
/// worker per scope.
#[derive(Debug, Default)]
pub struct Registration {
    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start installing a new version.
    pub fn update(&mut self, version: impl Into<String>) -> ServiceWorkerId {
        let mut worker = ServiceWorker::new(version);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        if let Some(mut previous) = self.installing.replace(worker) {
            previous.set_state(WorkerState::Redundant);
        }
        id
    }

    /// Finish installing.
    ///
    /// The worker waits while another one is active, unless it asked to
    /// skip waiting. Returns `true` if it was promoted to active.
    pub fn install_complete(&mut self, skip_waiting: bool) -> bool {
        let Some(mut worker) = self.installing.take() else {
            return false;
        };
        worker.set_state(WorkerState::Installed);
        if let Some(mut stale) = self.waiting.replace(worker) {
            stale.set_state(WorkerState::Redundant);
        }

        if skip_waiting || self.active.is_none() {
            self.activate();
            true
        } else {
            false
        }
    }

    /// Drop the installing worker after a failed install.
    pub fn install_failed(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Redundant);
        }
    }

    /// Promote the waiting worker, retiring the active one.
    pub fn activate(&mut self) {
        if let Some(mut worker) = self.waiting.take() {
            if let Some(mut old) = self.active.take() {
                old.set_state(WorkerState::Redundant);
                debug!(version = %old.version, "Worker retired");
            }
            worker.set_state(WorkerState::Activated);
            debug!(version = %worker.version, "Worker activated");
            self.active = Some(worker);
        }
    }

    /// Version of the worker controlling pages.
    pub fn controller_version(&self) -> Option<&str> {
        self.active.as_ref().map(|w| w.version.as_str())
    }
}
