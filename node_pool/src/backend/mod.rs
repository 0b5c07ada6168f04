//! Collaborator contracts for the node pool.
//!
//! The pool never talks to a hypervisor or a display server itself. A
//! [`VmBackend`] creates [`TestNode`] handles, and a [`DisplayPool`] hands out
//! remote display sessions for node addresses out of a fixed-capacity pool.

#[cfg(test)]
pub(crate) mod mock;

use serde_json::Value;

/// Creates virtual machines for the pool.
pub trait VmBackend {
    type Node: TestNode;
    type Error: std::error::Error;

    /// Create and start a VM named `name` from `template`.
    ///
    /// `keep_alive` is handed to the node, which decides what
    /// [`TestNode::destroy`] means for a VM that should outlive the run.
    async fn create(
        &self,
        name: &str,
        template: &str,
        keep_alive: bool,
    ) -> Result<Self::Node, Self::Error>;
}

/// Handle to one provisioned VM.
pub trait TestNode {
    /// Remote display session bound to the node.
    type Session;
    type Error: std::error::Error;

    fn name(&self) -> &str;

    /// Backend identifier. The display port is derived from it.
    fn id(&self) -> u32;

    /// Whether the VM came up and can be worked with.
    async fn ready(&self) -> bool;

    /// Run provisioning instructions against the node.
    async fn bootstrap(
        &mut self,
        run_list: &[String],
        options: Option<&Value>,
    ) -> Result<(), Self::Error>;

    async fn destroy(&mut self) -> Result<(), Self::Error>;

    fn display_session(&self) -> Option<&Self::Session>;

    fn set_display_session(&mut self, session: Self::Session);
}

/// One slot requested from the display pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRequest {
    node: String,
    address: String,
}

impl DisplayRequest {
    pub fn new(node: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            address: address.into(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// `host:port` of the node's remote display.
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// A session granted for one [`DisplayRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayGrant<S> {
    node: String,
    session: S,
}

impl<S> DisplayGrant<S> {
    pub fn new(node: impl Into<String>, session: S) -> Self {
        Self {
            node: node.into(),
            session,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn into_parts(self) -> (String, S) {
        (self.node, self.session)
    }
}

/// Fixed-capacity pool of remote display sessions.
pub trait DisplayPool {
    type Session;
    type Error: std::error::Error;

    /// Allocate one session per request.
    ///
    /// Grants come back in request order, one per request, each naming the
    /// node of the request it answers.
    async fn allocate(
        &mut self,
        requests: &[DisplayRequest],
    ) -> Result<Vec<DisplayGrant<Self::Session>>, Self::Error>;

    /// Release every session this pool handed out.
    async fn release_all(&mut self) -> Result<(), Self::Error>;
}
