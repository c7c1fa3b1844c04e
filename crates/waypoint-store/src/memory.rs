use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::{Error, PersistenceStore, WorkflowState};

/// Process-local store backed by a map.
///
/// Positions are lost when the process exits. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
  states: Arc<RwLock<HashMap<String, WorkflowState>>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of instances with a saved position.
  pub fn len(&self) -> usize {
    self.states.read().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
  async fn save(&self, state: &WorkflowState) -> Result<(), Error> {
    self
      .states
      .write()
      .unwrap()
      .insert(state.instance_id.clone(), state.clone());
    Ok(())
  }

  async fn load(&self, instance_id: &str) -> Result<Option<WorkflowState>, Error> {
    Ok(self.states.read().unwrap().get(instance_id).cloned())
  }
}
