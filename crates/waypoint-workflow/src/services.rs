//! Late-bound capability resolution.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-keyed set of shared capabilities handed to every workflow context.
///
/// Steps should receive their collaborators through their constructors.
/// `Services` exists for the few that must be bound late, such as the runner
/// used by sub-workflow steps. Cloning is cheap; entries are shared.
#[derive(Clone, Default)]
pub struct Services {
  entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a capability, replacing any previous value of the same type.
  pub fn insert<T>(&mut self, value: T)
  where
    T: Send + Sync + 'static,
  {
    self.entries.insert(TypeId::of::<T>(), Arc::new(value));
  }

  /// Builder-style variant of [`Services::insert`].
  pub fn with<T>(mut self, value: T) -> Self
  where
    T: Send + Sync + 'static,
  {
    self.insert(value);
    self
  }

  /// Resolve a capability by type.
  pub fn get<T>(&self) -> Option<&T>
  where
    T: Send + Sync + 'static,
  {
    self
      .entries
      .get(&TypeId::of::<T>())
      .and_then(|entry| entry.downcast_ref::<T>())
  }

  pub fn contains<T>(&self) -> bool
  where
    T: Send + Sync + 'static,
  {
    self.entries.contains_key(&TypeId::of::<T>())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl fmt::Debug for Services {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Services")
      .field("entries", &self.entries.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  trait Greeter: Send + Sync {
    fn greet(&self) -> String;
  }

  struct English;

  impl Greeter for English {
    fn greet(&self) -> String {
      "hello".to_string()
    }
  }

  #[test]
  fn test_resolves_trait_objects_by_arc_type() {
    let services = Services::new().with::<Arc<dyn Greeter>>(Arc::new(English));

    let greeter = services.get::<Arc<dyn Greeter>>().unwrap();
    assert_eq!(greeter.greet(), "hello");
    assert!(services.get::<String>().is_none());
  }

  #[test]
  fn test_insert_replaces_same_type() {
    let mut services = Services::new();
    services.insert(1u32);
    services.insert(2u32);

    assert_eq!(services.len(), 1);
    assert_eq!(services.get::<u32>(), Some(&2));
  }

  #[test]
  fn test_clones_share_entries() {
    let services = Services::new().with(String::from("shared"));
    let copy = services.clone();
    assert_eq!(copy.get::<String>().map(String::as_str), Some("shared"));
  }
}
