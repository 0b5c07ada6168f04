//! Error Types
//!
//! Errors surfaced by the node pool. Collaborator failures are carried as
//! strings together with the node and the operation that failed, so callers
//! never have to name a backend's own error type.

use std::fmt;

#[derive(Debug)]
pub enum PoolError {
    /// A node name appears twice in one batch or is already in the pool.
    DuplicateNode(String),
    /// Bootstrapping was requested for a node that has no handle.
    MissingNode(String),
    Bootstrap { node: String, reason: String },
    Destroy { node: String, reason: String },
    Display(String),
    /// Every failure collected while tearing a pool down.
    Teardown(Vec<PoolError>),
}

impl PoolError {
    /// Name of the node the error is about, if it is about a single node.
    pub fn node(&self) -> Option<&str> {
        match self {
            PoolError::DuplicateNode(node) | PoolError::MissingNode(node) => Some(node),
            PoolError::Bootstrap { node, .. } | PoolError::Destroy { node, .. } => Some(node),
            PoolError::Display(_) | PoolError::Teardown(_) => None,
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::DuplicateNode(node) => write!(f, "Duplicate node name: {}", node),
            PoolError::MissingNode(node) => write!(f, "No node named {} in the pool", node),
            PoolError::Bootstrap { node, reason } => {
                write!(f, "Bootstrap of node {} failed: {}", node, reason)
            }
            PoolError::Destroy { node, reason } => {
                write!(f, "Destroying node {} failed: {}", node, reason)
            }
            PoolError::Display(msg) => write!(f, "Display pool error: {}", msg),
            PoolError::Teardown(errors) => {
                write!(f, "Pool teardown finished with {} error(s)", errors.len())?;
                for err in errors {
                    write!(f, "; {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for PoolError {}
