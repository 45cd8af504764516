use thiserror::Error;

/// Errors surfaced by graph traversals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("circular dependency detected: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },
}

/// Errors surfaced while resolving schemas into a graph or lockfile.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("module not found: {module}@{version}")]
    ModuleNotFound { module: String, version: String },

    #[error("schema store error: {0}")]
    Store(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to encode lockfile: {0}")]
    Serialization(#[from] serde_json::Error),
}
