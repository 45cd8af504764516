use thiserror::Error;

/// Errors surfaced by the RBAC subsystem.
#[derive(Debug, Error)]
pub enum RbacError {
    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("team not found: {0}")]
    TeamNotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("built-in role is immutable: {0}")]
    ImmutableBuiltInRole(String),

    #[error("team support is disabled")]
    TeamsDisabled,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
