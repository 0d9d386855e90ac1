//! State records threaded through graph execution

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fields shared by every workflow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseState {
    execution_id: Uuid,
    pub last_updated: DateTime<Utc>,
    /// Values recorded by nodes, keyed by node id. Entries are overwritten
    /// when a node runs again but never removed during a run.
    #[serde(default)]
    pub outputs: HashMap<String, serde_json::Value>,
}

impl BaseState {
    pub fn new() -> Self {
        Self::with_execution_id(Uuid::new_v4())
    }

    pub fn with_execution_id(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            last_updated: Utc::now(),
            outputs: HashMap::new(),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn record_output(&mut self, node_id: &str, value: serde_json::Value) {
        self.outputs.insert(node_id.to_string(), value);
    }

    pub fn output(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.outputs.get(node_id)
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

impl Default for BaseState {
    fn default() -> Self {
        Self::new()
    }
}

/// A workflow state type usable by the executor.
///
/// `Update` is the partial form of the state: every field is optional and
/// [`GraphState::merge`] copies only the fields that are present. Nested
/// values are replaced whole, never merged recursively.
pub trait GraphState: Clone + std::fmt::Debug + Send + Sync + 'static {
    type Update: Send + 'static;

    fn base(&self) -> &BaseState;

    fn base_mut(&mut self) -> &mut BaseState;

    fn merge(&mut self, update: Self::Update);
}

/// Open key/value state for graphs that do not need a dedicated struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    #[serde(flatten)]
    pub base: BaseState,
    #[serde(default)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl MapState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: serde_json::Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

impl GraphState for MapState {
    type Update = serde_json::Map<String, serde_json::Value>;

    fn base(&self) -> &BaseState {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseState {
        &mut self.base
    }

    fn merge(&mut self, update: Self::Update) {
        for (key, value) in update {
            self.values.insert(key, value);
        }
    }
}
