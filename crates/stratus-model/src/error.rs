use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("required configuration field '{0}' is missing or empty")]
    MissingField(&'static str),
    #[error("unknown instance type: {0}")]
    UnknownInstanceType(String),
    #[error("invalid task spec: {0}")]
    InvalidSpec(String),
}
