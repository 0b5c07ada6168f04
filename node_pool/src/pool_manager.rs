//! Single owner of a named set of test nodes.
//!
//! Provisions nodes through a [`VmBackend`] with bounded retry, bootstraps
//! the ones that carry a run list, and binds them once to remote display
//! sessions from a [`DisplayPool`]. [`NodePool::release`] gives the sessions
//! back and destroys every node.
//!
//! Every mutating operation takes `&mut self`: one owner drives a pool and
//! operations run one at a time, each remote call awaited in turn.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::backend::{DisplayGrant, DisplayPool, DisplayRequest, TestNode, VmBackend};
use crate::config::Config;
use crate::error::PoolError;
use crate::matcher::NodeMatcher;
use crate::spec::NodeSpec;

type SessionOf<B> = <<B as VmBackend>::Node as TestNode>::Session;

// ─── Configuration ─────────────────────────────────────────────────────────

/// Tunables of the provisioning loop and display addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Provisioning rounds before unready nodes are given up on
    pub retry_limit: u32,
    /// Nodes created per provisioning round
    pub batch_size: usize,
    /// Display port of a node is this base plus the node id
    pub display_port_base: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            batch_size: 2,
            display_port_base: 5900,
        }
    }
}

impl PoolSettings {
    /// Most nodes one `add_nodes` call can create.
    /// Saturates at `usize::MAX`.
    pub fn capacity(&self) -> usize {
        (self.retry_limit as usize).saturating_mul(self.batch_size)
    }
}

/// Outcome of [`NodePool::init_display_sessions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayInit {
    /// Sessions were bound to this many nodes.
    Initialized(usize),
    /// This pool already bound its sessions once.
    AlreadyInitialized,
    /// No node matched; the display pool was not contacted.
    NoTargets,
}

impl DisplayInit {
    pub fn is_initialized(&self) -> bool {
        matches!(self, DisplayInit::Initialized(_))
    }
}

// ─── NodePool ──────────────────────────────────────────────────────────────

pub struct NodePool<B: VmBackend, D> {
    nodes: BTreeMap<String, B::Node>,
    display_initialized: bool,
    backend: B,
    display: D,
    config: Config,
    settings: PoolSettings,
}

impl<B, D> NodePool<B, D>
where
    B: VmBackend,
    D: DisplayPool<Session = SessionOf<B>>,
{
    pub fn new(backend: B, display: D, config: Config, settings: PoolSettings) -> Self {
        Self {
            nodes: BTreeMap::new(),
            display_initialized: false,
            backend,
            display,
            config,
            settings,
        }
    }

    /// Build a pool and provision `specs` into it.
    ///
    /// If provisioning fails, whatever was created is torn down before the
    /// error is returned.
    pub async fn with_nodes(
        backend: B,
        display: D,
        config: Config,
        settings: PoolSettings,
        specs: &[NodeSpec],
    ) -> Result<Self, PoolError> {
        let mut pool = Self::new(backend, display, config, settings);
        let provisioned = pool.add_nodes(specs).await.map(|_| ());
        if let Err(err) = provisioned {
            if let Err(teardown) = pool.release().await {
                warn!(error = %teardown, "Teardown after failed provisioning was incomplete");
            }
            return Err(err);
        }
        Ok(pool)
    }

    // ─── Provisioning ──────────────────────────────────────────────────

    /// Create nodes for `specs`, retrying the ones that don't come up, then
    /// bootstrap every spec that has a run list.
    ///
    /// Each round creates at most `batch_size` of the remaining nodes, after
    /// which the whole remaining list is checked again for readiness. After
    /// `retry_limit` rounds the leftovers stay absent or unready; that is
    /// logged, not returned as an error.
    #[instrument(skip_all, fields(count = specs.len()))]
    pub async fn add_nodes(&mut self, specs: &[NodeSpec]) -> Result<&mut Self, PoolError> {
        self.check_unique(specs)?;

        let mut remaining: Vec<&NodeSpec> = specs.iter().collect();
        let mut tries_left = self.settings.retry_limit;
        let mut round = 0;

        while !remaining.is_empty() && tries_left > 0 {
            round += 1;
            for spec in remaining.iter().take(self.settings.batch_size) {
                self.provision(spec).await;
            }

            let mut pending = Vec::with_capacity(remaining.len());
            for spec in remaining {
                if !self.is_ready(spec.name()).await {
                    pending.push(spec);
                }
            }
            remaining = pending;
            tries_left -= 1;

            debug!(round, pending = remaining.len(), "Provisioning round finished");
        }

        for spec in &remaining {
            let state = if self.nodes.contains_key(spec.name()) {
                "unready"
            } else {
                "absent"
            };
            warn!(node = %spec.name(), state, rounds = round, "Node not ready after provisioning retries");
        }

        self.bootstrap(specs).await?;
        Ok(self)
    }

    fn check_unique(&self, specs: &[NodeSpec]) -> Result<(), PoolError> {
        let mut seen = HashSet::with_capacity(specs.len());
        for spec in specs {
            if self.nodes.contains_key(spec.name()) || !seen.insert(spec.name()) {
                return Err(PoolError::DuplicateNode(spec.name().to_string()));
            }
        }
        Ok(())
    }

    /// Create the node for `spec`, replacing an earlier handle that never
    /// became ready.
    async fn provision(&mut self, spec: &NodeSpec) {
        if let Some(mut stale) = self.nodes.remove(spec.name()) {
            debug!(node = %spec.name(), "Destroying unready node before recreating it");
            if let Err(e) = stale.destroy().await {
                warn!(node = %spec.name(), error = %e, "Failed to destroy unready node");
            }
        }

        match self
            .backend
            .create(spec.name(), spec.template(), spec.is_keep_alive())
            .await
        {
            Ok(mut node) if node.name() != spec.name() => {
                warn!(
                    node = %spec.name(),
                    reported = %node.name(),
                    "Backend returned a node under another name; destroying it"
                );
                if let Err(e) = node.destroy().await {
                    warn!(node = %spec.name(), error = %e, "Failed to destroy misnamed node");
                }
            }
            Ok(node) => {
                info!(
                    node = %spec.name(),
                    template = %spec.template(),
                    id = node.id(),
                    "Node created"
                );
                self.nodes.insert(spec.name().to_string(), node);
            }
            Err(e) => {
                warn!(node = %spec.name(), template = %spec.template(), error = %e, "Node creation failed");
            }
        }
    }

    async fn is_ready(&self, name: &str) -> bool {
        match self.nodes.get(name) {
            Some(node) => {
                let ready = node.ready().await;
                debug!(node = %name, ready, "Readiness check");
                ready
            }
            None => false,
        }
    }

    /// Run the run list of every spec that has one against its node.
    ///
    /// Stops at the first failure. A spec whose node is not in the pool is a
    /// [`PoolError::MissingNode`].
    #[instrument(skip_all, fields(count = specs.len()))]
    pub async fn bootstrap(&mut self, specs: &[NodeSpec]) -> Result<(), PoolError> {
        for spec in specs.iter().filter(|spec| spec.has_run_list()) {
            let node = self
                .nodes
                .get_mut(spec.name())
                .ok_or_else(|| PoolError::MissingNode(spec.name().to_string()))?;

            info!(node = %spec.name(), run_list = ?spec.recipes(), "Bootstrapping node");
            node.bootstrap(spec.recipes(), spec.bootstrap_options())
                .await
                .map_err(|e| PoolError::Bootstrap {
                    node: spec.name().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    // ─── Lookup and iteration ──────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<&B::Node> {
        self.nodes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut B::Node> {
        self.nodes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in iteration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Nodes whose name `matcher` accepts, ordered by name.
    pub fn iter_matching<'a, M>(&'a self, matcher: M) -> impl Iterator<Item = (&'a str, &'a B::Node)>
    where
        M: NodeMatcher + 'a,
    {
        self.nodes
            .iter()
            .filter(move |(name, _)| matcher.accepts(name))
            .map(|(name, node)| (name.as_str(), node))
    }

    /// Visit every node.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &B::Node),
    {
        for (name, node) in &self.nodes {
            visit(name, node);
        }
    }

    /// Visit the nodes whose name `matcher` accepts.
    pub fn for_each_matching<M, F>(&self, matcher: M, mut visit: F)
    where
        M: NodeMatcher,
        F: FnMut(&str, &B::Node),
    {
        for (name, node) in self.iter_matching(matcher) {
            visit(name, node);
        }
    }

    /// Visit the nodes whose name `matcher` accepts, with mutable access.
    pub fn for_each_matching_mut<M, F>(&mut self, matcher: M, mut visit: F)
    where
        M: NodeMatcher,
        F: FnMut(&str, &mut B::Node),
    {
        for (name, node) in self.nodes.iter_mut() {
            if matcher.accepts(name) {
                visit(name, node);
            }
        }
    }

    // ─── Display sessions ──────────────────────────────────────────────

    pub fn is_display_initialized(&self) -> bool {
        self.display_initialized
    }

    /// Bind display sessions to the named nodes, or to every node when
    /// `names` is empty. Names not in the pool are skipped.
    ///
    /// A pool binds sessions once in its lifetime; later calls return
    /// [`DisplayInit::AlreadyInitialized`] without doing anything.
    #[instrument(skip_all, fields(requested = names.len()))]
    pub async fn init_display_sessions(&mut self, names: &[&str]) -> Result<DisplayInit, PoolError> {
        if self.display_initialized {
            debug!("Display sessions already initialized for this pool");
            return Ok(DisplayInit::AlreadyInitialized);
        }

        let mut requests = Vec::new();
        for (name, node) in &self.nodes {
            if !names.is_empty() && !names.iter().any(|n| *n == name.as_str()) {
                continue;
            }
            let address = self.display_address(name, node)?;
            debug!(node = %name, address = %address, "Node address");
            requests.push(DisplayRequest::new(name.as_str(), address));
        }

        if requests.is_empty() {
            debug!("No nodes to initialize display sessions on");
            return Ok(DisplayInit::NoTargets);
        }

        let grants = self.display.allocate(&requests).await.map_err(|e| {
            PoolError::Display(format!(
                "allocation of {} session(s) failed: {e}",
                requests.len()
            ))
        })?;
        self.assign_sessions(&requests, grants)?;

        self.display_initialized = true;
        info!(sessions = requests.len(), "Display sessions initialized");
        Ok(DisplayInit::Initialized(requests.len()))
    }

    /// `host:port` of a node's display. The port must fit a TCP port.
    fn display_address(&self, name: &str, node: &B::Node) -> Result<String, PoolError> {
        let port = self
            .settings
            .display_port_base
            .checked_add(node.id())
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| {
                PoolError::Display(format!(
                    "display port {} + {} of node {name} is not a valid port",
                    self.settings.display_port_base,
                    node.id()
                ))
            })?;
        Ok(format!("{}:{}", self.config.backend_host(), port))
    }

    /// Hand each granted session to its node. The whole response is checked
    /// against the requests before any node is touched.
    fn assign_sessions(
        &mut self,
        requests: &[DisplayRequest],
        grants: Vec<DisplayGrant<SessionOf<B>>>,
    ) -> Result<(), PoolError> {
        if grants.len() != requests.len() {
            return Err(PoolError::Display(format!(
                "requested {} session(s) but {} were granted",
                requests.len(),
                grants.len()
            )));
        }
        if let Some((request, grant)) = requests
            .iter()
            .zip(&grants)
            .find(|(request, grant)| request.node() != grant.node())
        {
            return Err(PoolError::Display(format!(
                "session for {} granted where {} was requested",
                grant.node(),
                request.node()
            )));
        }

        for grant in grants {
            let (name, session) = grant.into_parts();
            if let Some(node) = self.nodes.get_mut(&name) {
                node.set_display_session(session);
            }
        }
        Ok(())
    }

    // ─── Teardown ──────────────────────────────────────────────────────

    /// Release all display sessions, then destroy every node.
    ///
    /// A failing step does not stop the ones after it. Every failure is
    /// returned together in [`PoolError::Teardown`]. The pool is empty
    /// afterwards either way.
    #[instrument(skip_all)]
    pub async fn release(&mut self) -> Result<(), PoolError> {
        let mut failures = Vec::new();

        if let Err(e) = self.display.release_all().await {
            warn!(error = %e, "Failed to release display sessions");
            failures.push(PoolError::Display(format!("release failed: {e}")));
        }

        let nodes = std::mem::take(&mut self.nodes);
        info!(nodes = nodes.len(), "Destroying nodes");
        for (name, mut node) in nodes {
            match node.destroy().await {
                Ok(()) => debug!(node = %name, "Node destroyed"),
                Err(e) => {
                    warn!(node = %name, error = %e, "Failed to destroy node");
                    failures.push(PoolError::Destroy {
                        node: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            info!("Pool released");
            Ok(())
        } else {
            Err(PoolError::Teardown(failures))
        }
    }

    // ─── Accessors ─────────────────────────────────────────────────────

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn display(&self) -> &D {
        &self.display
    }
}
