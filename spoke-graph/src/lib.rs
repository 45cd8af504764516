//! Module dependency graph engine for the Spoke schema registry.
//!
//! Builds a multi-version dependency DAG out of parsed schema imports,
//! detects cycles, produces deterministic topological orderings and
//! lockfiles, and answers "what breaks if this module changes" impact
//! queries.

pub mod graph;
pub mod import;
pub mod resolver;
pub mod store;
pub mod types;

mod error;

pub use error::{GraphError, ResolveError};
pub use graph::DependencyGraph;
pub use import::parse_import;
pub use resolver::{
    DependencyResolver, LockfileValidation, ModuleStore, ProtoImportParser, SchemaParser,
    StaticModuleStore,
};
pub use store::SqliteModuleStore;
pub use types::{module_key, Dependency, DependencyKind, GraphNode, ImpactAnalysis, Lockfile};
