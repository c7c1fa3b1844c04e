//! Per-instance workflow context.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::WorkflowError;
use crate::services::Services;

/// Generate a new instance id.
///
/// Ids are UUIDv7 strings: random, but ordered by creation time so they sort
/// lexicographically.
pub fn new_instance_id() -> String {
  uuid::Uuid::now_v7().to_string()
}

/// An external event delivered to a parked instance on resume.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct ResumeEvent {
  pub name: String,
  #[serde(default)]
  pub payload: Value,
}

impl ResumeEvent {
  pub fn new(name: impl Into<String>, payload: Value) -> Self {
    Self {
      name: name.into(),
      payload,
    }
  }
}

/// Mutable state of one running instance.
///
/// A context is owned by exactly one dispatch chain at a time. It is not
/// persisted; only the step index is.
#[derive(Debug)]
pub struct WorkflowContext {
  instance_id: String,
  workflow: String,
  services: Services,
  input: Value,
  output: Option<Value>,
  items: HashMap<String, Value>,
  event: Option<ResumeEvent>,
}

impl WorkflowContext {
  pub fn new(instance_id: impl Into<String>, workflow: impl Into<String>, services: Services) -> Self {
    Self {
      instance_id: instance_id.into(),
      workflow: workflow.into(),
      services,
      input: Value::Null,
      output: None,
      items: HashMap::new(),
      event: None,
    }
  }

  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  /// Name of the workflow this instance runs.
  pub fn workflow(&self) -> &str {
    &self.workflow
  }

  pub fn services(&self) -> &Services {
    &self.services
  }

  pub fn services_mut(&mut self) -> &mut Services {
    &mut self.services
  }

  pub fn input(&self) -> &Value {
    &self.input
  }

  pub fn set_input(&mut self, input: Value) {
    self.input = input;
  }

  /// Deserialize the input into `T`.
  pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, WorkflowError> {
    serde_json::from_value(self.input.clone()).map_err(|source| WorkflowError::Decode {
      instance_id: self.instance_id.clone(),
      slot: "input",
      source,
    })
  }

  pub fn output(&self) -> Option<&Value> {
    self.output.as_ref()
  }

  pub fn set_output_value(&mut self, output: Value) {
    self.output = Some(output);
  }

  /// Serialize `output` into the output slot.
  pub fn set_output<T: Serialize>(&mut self, output: &T) -> Result<(), WorkflowError> {
    let value = serde_json::to_value(output).map_err(|source| WorkflowError::Encode {
      instance_id: self.instance_id.clone(),
      source,
    })?;
    self.output = Some(value);
    Ok(())
  }

  /// Deserialize the output slot into `T`, if it has been written.
  pub fn output_as<T: DeserializeOwned>(&self) -> Result<Option<T>, WorkflowError> {
    self
      .output
      .clone()
      .map(serde_json::from_value)
      .transpose()
      .map_err(|source| WorkflowError::Decode {
        instance_id: self.instance_id.clone(),
        slot: "output",
        source,
      })
  }

  pub fn take_output(&mut self) -> Option<Value> {
    self.output.take()
  }

  pub fn item(&self, key: &str) -> Option<&Value> {
    self.items.get(key)
  }

  pub fn set_item(&mut self, key: impl Into<String>, value: Value) {
    self.items.insert(key.into(), value);
  }

  pub fn remove_item(&mut self, key: &str) -> Option<Value> {
    self.items.remove(key)
  }

  /// True when the item `key` is the boolean `true`.
  pub fn flag(&self, key: &str) -> bool {
    matches!(self.items.get(key), Some(Value::Bool(true)))
  }

  pub fn items(&self) -> &HashMap<String, Value> {
    &self.items
  }

  /// The event delivered with the current resume, if not yet consumed.
  pub fn event(&self) -> Option<&ResumeEvent> {
    self.event.as_ref()
  }

  pub fn deliver_event(&mut self, event: ResumeEvent) {
    self.event = Some(event);
  }

  /// Consume the delivered event if its name matches.
  pub fn take_event(&mut self, name: &str) -> Option<ResumeEvent> {
    match &self.event {
      Some(event) if event.name == name => self.event.take(),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct TokenRequest {
    grant_type: String,
  }

  fn ctx() -> WorkflowContext {
    WorkflowContext::new("inst-1", "token", Services::new())
  }

  #[test]
  fn test_typed_input() {
    let mut ctx = ctx();
    ctx.set_input(json!({ "grant_type": "client_credentials" }));

    let req: TokenRequest = ctx.input_as().unwrap();
    assert_eq!(req.grant_type, "client_credentials");
  }

  #[test]
  fn test_input_decode_error_names_slot() {
    let ctx = ctx();
    let err = ctx.input_as::<TokenRequest>().unwrap_err();
    assert!(err.to_string().contains("input"));
    assert!(err.to_string().contains("inst-1"));
  }

  #[test]
  fn test_output_roundtrip() {
    let mut ctx = ctx();
    assert_eq!(ctx.output_as::<String>().unwrap(), None);

    ctx.set_output(&"token-abc").unwrap();
    assert_eq!(ctx.output_as::<String>().unwrap().as_deref(), Some("token-abc"));
    assert_eq!(ctx.take_output(), Some(json!("token-abc")));
    assert!(ctx.output().is_none());
  }

  #[test]
  fn test_flag() {
    let mut ctx = ctx();
    assert!(!ctx.flag("vip"));
    ctx.set_item("vip", json!(true));
    assert!(ctx.flag("vip"));
    ctx.set_item("vip", json!("yes"));
    assert!(!ctx.flag("vip"));
  }

  #[test]
  fn test_take_event_matches_name() {
    let mut ctx = ctx();
    ctx.deliver_event(ResumeEvent::new("approved", json!({ "by": "ops" })));

    assert!(ctx.take_event("rejected").is_none());
    assert!(ctx.event().is_some());

    let event = ctx.take_event("approved").unwrap();
    assert_eq!(event.payload["by"], "ops");
    assert!(ctx.event().is_none());
  }

  #[test]
  fn test_instance_ids_sort_by_creation() {
    let first = new_instance_id();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = new_instance_id();
    assert_ne!(first, second);
    assert!(first < second);
  }
}
