//! Pool manager for ephemeral test nodes.
//!
//! A [`NodePool`] provisions a named set of VMs through a [`VmBackend`],
//! bootstraps them, binds them to remote display sessions from a
//! [`DisplayPool`], and tears everything down again when a test run ends.
//!
//! [`VmBackend`]: backend::VmBackend
//! [`DisplayPool`]: backend::DisplayPool

pub mod backend;
pub mod config;
mod error;
pub mod matcher;
mod pool_manager;
pub mod spec;


pub use config::{Config, ConfigError, ConfigKey, DEFAULT_CONFIG_PATH};
pub use error::PoolError;
pub use pool_manager::{DisplayInit, NodePool, PoolSettings};
pub use spec::{NodeSpec, PlanError, PoolPlan};
