//! Mock collaborators for unit testing.
//!
//! Provides [`MockBackend`], [`MockNode`] and [`MockDisplayPool`]: in-memory
//! implementations of the collaborator traits that record every call without
//! touching a real hypervisor or display server.
//!
//! Failures and slow-to-boot nodes are injected via [`MockBackendConfig`]
//! and [`MockDisplayConfig`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::backend::{DisplayGrant, DisplayPool, DisplayRequest, TestNode, VmBackend};

// ─── Configuration for failure injection ──────────────────────────────────

/// Controls how mock nodes behave. Everything defaults to success with the
/// node ready on its first creation.
#[derive(Debug, Clone, Default)]
pub struct MockBackendConfig {
    /// Creation attempt (1-based) from which the node reports ready
    pub ready_on_attempt: HashMap<String, usize>,
    /// Nodes that never report ready
    pub never_ready: HashSet<String>,
    /// Nodes whose creation always fails
    pub create_errors: HashSet<String>,
    /// Nodes whose bootstrap fails
    pub bootstrap_errors: HashSet<String>,
    /// Nodes whose destroy fails
    pub destroy_errors: HashSet<String>,
    /// Fixed backend ids instead of the sequential ones
    pub ids: HashMap<String, u32>,
    /// Nodes whose handle reports another name than the one requested
    pub reported_names: HashMap<String, String>,
}

impl MockBackendConfig {
    pub fn ready_on_attempt(mut self, name: &str, attempt: usize) -> Self {
        self.ready_on_attempt.insert(name.to_string(), attempt);
        self
    }

    pub fn never_ready(mut self, name: &str) -> Self {
        self.never_ready.insert(name.to_string());
        self
    }

    pub fn create_error(mut self, name: &str) -> Self {
        self.create_errors.insert(name.to_string());
        self
    }

    pub fn bootstrap_error(mut self, name: &str) -> Self {
        self.bootstrap_errors.insert(name.to_string());
        self
    }

    pub fn destroy_error(mut self, name: &str) -> Self {
        self.destroy_errors.insert(name.to_string());
        self
    }

    pub fn node_id(mut self, name: &str, id: u32) -> Self {
        self.ids.insert(name.to_string(), id);
        self
    }

    pub fn reports_name(mut self, name: &str, reported: &str) -> Self {
        self.reported_names
            .insert(name.to_string(), reported.to_string());
        self
    }
}

// ─── Call tracker (shared between backend and nodes) ──────────────────────

/// A bootstrap call as the node saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapCall {
    pub node: String,
    pub run_list: Vec<String>,
    pub options: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MockCallTracker {
    pub creates: Arc<AtomicUsize>,
    pub readiness_checks: Arc<AtomicUsize>,
    next_id: Arc<AtomicU32>,
    attempts: Arc<Mutex<HashMap<String, usize>>>,
    created: Arc<Mutex<Vec<(String, bool)>>>,
    destroyed: Arc<Mutex<Vec<String>>>,
    bootstraps: Arc<Mutex<Vec<BootstrapCall>>>,
}

impl MockCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn readiness_check_count(&self) -> usize {
        self.readiness_checks.load(Ordering::Relaxed)
    }

    pub fn attempts(&self, name: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Names passed to `create`, with the keep-alive flag, in call order.
    pub fn created(&self) -> Vec<(String, bool)> {
        self.created.lock().unwrap().clone()
    }

    /// Names of destroyed nodes, in call order.
    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn destroy_count(&self) -> usize {
        self.destroyed.lock().unwrap().len()
    }

    pub fn bootstraps(&self) -> Vec<BootstrapCall> {
        self.bootstraps.lock().unwrap().clone()
    }

    fn next_attempt(&self, name: &str) -> usize {
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = attempts.entry(name.to_string()).or_insert(0);
        *attempt += 1;
        *attempt
    }
}

// ─── Mock error ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockError(pub String);

impl std::fmt::Display for MockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mock error: {}", self.0)
    }
}

impl std::error::Error for MockError {}

// ─── Mock node ────────────────────────────────────────────────────────────

/// Display session handed out by [`MockDisplayPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSession {
    pub slot: usize,
    pub address: String,
}

#[derive(Debug)]
pub struct MockNode {
    name: String,
    id: u32,
    ready: bool,
    keep_alive: bool,
    session: Option<MockSession>,
    tracker: MockCallTracker,
    config: MockBackendConfig,
}

impl MockNode {
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }
}

impl TestNode for MockNode {
    type Session = MockSession;
    type Error = MockError;

    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u32 {
        self.id
    }

    async fn ready(&self) -> bool {
        self.tracker.readiness_checks.fetch_add(1, Ordering::Relaxed);
        self.ready
    }

    async fn bootstrap(
        &mut self,
        run_list: &[String],
        options: Option<&Value>,
    ) -> Result<(), Self::Error> {
        self.tracker.bootstraps.lock().unwrap().push(BootstrapCall {
            node: self.name.clone(),
            run_list: run_list.to_vec(),
            options: options.cloned(),
        });
        if self.config.bootstrap_errors.contains(&self.name) {
            return Err(MockError(format!("chef run failed on {}", self.name)));
        }
        Ok(())
    }

    async fn destroy(&mut self) -> Result<(), Self::Error> {
        self.tracker.destroyed.lock().unwrap().push(self.name.clone());
        if self.config.destroy_errors.contains(&self.name) {
            return Err(MockError(format!("could not delete vm {}", self.id)));
        }
        Ok(())
    }

    fn display_session(&self) -> Option<&Self::Session> {
        self.session.as_ref()
    }

    fn set_display_session(&mut self, session: Self::Session) {
        self.session = Some(session);
    }
}

// ─── Mock backend factory ─────────────────────────────────────────────────

pub struct MockBackend {
    pub tracker: MockCallTracker,
    pub config: MockBackendConfig,
}

impl MockBackend {
    /// Create a new mock backend where every node comes up at once.
    pub fn new() -> (Self, MockCallTracker) {
        Self::with_config(MockBackendConfig::default())
    }

    /// Create a mock backend with failure injection.
    pub fn with_config(config: MockBackendConfig) -> (Self, MockCallTracker) {
        let tracker = MockCallTracker::new();
        let backend = Self {
            tracker: tracker.clone(),
            config,
        };
        (backend, tracker)
    }
}

impl VmBackend for MockBackend {
    type Node = MockNode;
    type Error = MockError;

    async fn create(
        &self,
        name: &str,
        _template: &str,
        keep_alive: bool,
    ) -> Result<MockNode, MockError> {
        self.tracker.creates.fetch_add(1, Ordering::Relaxed);
        self.tracker
            .created
            .lock()
            .unwrap()
            .push((name.to_string(), keep_alive));
        let attempt = self.tracker.next_attempt(name);

        if self.config.create_errors.contains(name) {
            return Err(MockError(format!("template for {name} not found")));
        }

        let ready = !self.config.never_ready.contains(name)
            && attempt >= self.config.ready_on_attempt.get(name).copied().unwrap_or(1);

        let sequential = self.tracker.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(MockNode {
            name: self
                .config
                .reported_names
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string()),
            id: self.config.ids.get(name).copied().unwrap_or(sequential),
            ready,
            keep_alive,
            session: None,
            tracker: self.tracker.clone(),
            config: self.config.clone(),
        })
    }
}

// ─── Mock display pool ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MockDisplayConfig {
    /// Slots available; `None` means unlimited
    pub capacity: Option<usize>,
    /// Return grants in reverse order
    pub reverse_grants: bool,
    /// Fail `release_all`
    pub release_error: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockDisplayTracker {
    pub releases: Arc<AtomicUsize>,
    allocations: Arc<Mutex<Vec<Vec<DisplayRequest>>>>,
}

impl MockDisplayTracker {
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }

    /// Every `allocate` call's requests, in call order.
    pub fn allocations(&self) -> Vec<Vec<DisplayRequest>> {
        self.allocations.lock().unwrap().clone()
    }
}

pub struct MockDisplayPool {
    tracker: MockDisplayTracker,
    config: MockDisplayConfig,
    in_use: usize,
}

impl MockDisplayPool {
    pub fn new() -> (Self, MockDisplayTracker) {
        Self::with_config(MockDisplayConfig::default())
    }

    pub fn with_config(config: MockDisplayConfig) -> (Self, MockDisplayTracker) {
        let tracker = MockDisplayTracker::default();
        let pool = Self {
            tracker: tracker.clone(),
            config,
            in_use: 0,
        };
        (pool, tracker)
    }

    /// Sessions handed out since the last successful release.
    pub fn in_use(&self) -> usize {
        self.in_use
    }
}

impl DisplayPool for MockDisplayPool {
    type Session = MockSession;
    type Error = MockError;

    async fn allocate(
        &mut self,
        requests: &[DisplayRequest],
    ) -> Result<Vec<DisplayGrant<MockSession>>, MockError> {
        self.tracker
            .allocations
            .lock()
            .unwrap()
            .push(requests.to_vec());

        if let Some(capacity) = self.config.capacity {
            if self.in_use + requests.len() > capacity {
                return Err(MockError(format!(
                    "display pool exhausted: {} of {} slots in use",
                    self.in_use, capacity
                )));
            }
        }

        let mut grants: Vec<_> = requests
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let session = MockSession {
                    slot: self.in_use + index,
                    address: request.address().to_string(),
                };
                DisplayGrant::new(request.node(), session)
            })
            .collect();
        self.in_use += requests.len();

        if self.config.reverse_grants {
            grants.reverse();
        }
        Ok(grants)
    }

    async fn release_all(&mut self) -> Result<(), MockError> {
        self.tracker.releases.fetch_add(1, Ordering::Relaxed);
        if self.config.release_error {
            return Err(MockError("display server unreachable".to_string()));
        }
        self.in_use = 0;
        Ok(())
    }
}
