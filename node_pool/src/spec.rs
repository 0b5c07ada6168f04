//! Node specifications and pool plan files.
//!
//! A [`NodeSpec`] describes one node to create: a unique name, the backend
//! template, and optional bootstrap data. A [`PoolPlan`] is a YAML file with
//! pool settings and a list of node specs:
//!
//! ```yaml
//! settings:
//!   retry_limit: 3
//!   batch_size: 2
//! nodes:
//!   - name: web1
//!     template: ubuntu-22.04
//!     run_list: recipe[webserver]
//!   - name: db1
//!     template: ubuntu-22.04
//!     run_list:
//!       - recipe[postgres]
//!       - recipe[backup]
//!     options: { port: 5432 }
//!     keep_alive: true
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::pool_manager::PoolSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    name: String,
    template: String,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    run_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<Value>,
    #[serde(default)]
    keep_alive: bool,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            run_list: Vec::new(),
            options: None,
            keep_alive: false,
        }
    }

    pub fn run_list<I, S>(mut self, run_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_list = run_list.into_iter().map(Into::into).collect();
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn recipes(&self) -> &[String] {
        &self.run_list
    }

    pub fn bootstrap_options(&self) -> Option<&Value> {
        self.options.as_ref()
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether the node gets bootstrapped after provisioning.
    pub fn has_run_list(&self) -> bool {
        !self.run_list.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(entry) if entry.is_empty() => Vec::new(),
        OneOrMany::One(entry) => vec![entry],
        OneOrMany::Many(entries) => entries,
    })
}

// ─── Pool plan ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolPlan {
    #[serde(default)]
    settings: PoolSettings,
    nodes: Vec<NodeSpec>,
}

impl PoolPlan {
    pub fn new(settings: PoolSettings, nodes: Vec<NodeSpec>) -> Self {
        Self { settings, nodes }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, PlanError> {
        Ok(serde_yaml_ng::from_str(raw)?)
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Check the plan for problems the pool would reject or trip over.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        if self.settings.retry_limit == 0 {
            problems.push("retry_limit must be at least 1".to_string());
        }
        if self.settings.batch_size == 0 {
            problems.push("batch_size must be at least 1".to_string());
        }

        for (index, spec) in self.nodes.iter().enumerate() {
            if spec.name.trim().is_empty() {
                problems.push(format!("node #{} has an empty name", index + 1));
                continue;
            }
            if spec.template.trim().is_empty() {
                problems.push(format!("node {} has an empty template", spec.name));
            }
            if !seen.insert(spec.name.as_str()) {
                problems.push(format!("node name {} is used more than once", spec.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PlanError::Invalid(problems))
        }
    }

    /// Nodes past what a single provisioning call can create even when every
    /// node comes up on its first attempt.
    pub fn beyond_capacity(&self) -> &[NodeSpec] {
        let capacity = self.settings.capacity().min(self.nodes.len());
        &self.nodes[capacity..]
    }
}

#[derive(Debug)]
pub enum PlanError {
    Io(std::io::Error),
    Yaml(serde_yaml_ng::Error),
    Invalid(Vec<String>),
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::Io(err) => write!(f, "IO error: {}", err),
            PlanError::Yaml(err) => write!(f, "YAML error: {}", err),
            PlanError::Invalid(problems) => write!(f, "Invalid plan: {}", problems.join("; ")),
        }
    }
}

impl std::error::Error for PlanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlanError::Io(err) => Some(err),
            PlanError::Yaml(err) => Some(err),
            PlanError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for PlanError {
    fn from(err: std::io::Error) -> Self {
        PlanError::Io(err)
    }
}

impl From<serde_yaml_ng::Error> for PlanError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        PlanError::Yaml(err)
    }
}
