use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("workflow name must not be empty")]
  EmptyName,

  #[error("label must not be empty in workflow '{workflow}'")]
  EmptyLabel { workflow: String },

  #[error("duplicate label '{label}' in workflow '{workflow}' (steps {first} and {second})")]
  DuplicateLabel {
    workflow: String,
    label: String,
    first: usize,
    second: usize,
  },

  #[error("failed to decode {slot} for instance '{instance_id}': {source}")]
  Decode {
    instance_id: String,
    slot: &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to encode output for instance '{instance_id}': {source}")]
  Encode {
    instance_id: String,
    #[source]
    source: serde_json::Error,
  },
}
