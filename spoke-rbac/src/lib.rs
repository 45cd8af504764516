//! Role-based access control for the Spoke schema registry.
//!
//! Decisions ("may user U perform action A on resource R in scope S")
//! combine direct role grants, team-inherited grants, and role
//! inheritance, evaluated against a persistent store through a
//! TTL-bounded decision cache. The [`RbacManager`] is the write path:
//! every grant or revoke it performs invalidates the affected users'
//! cached decisions before returning.

pub mod builtin;
pub mod checker;
pub mod config;
pub mod manager;
pub mod model;
pub mod store;

mod error;

pub use builtin::{builtin_roles, seed_builtin_roles};
pub use checker::PermissionChecker;
pub use config::RbacConfig;
pub use error::RbacError;
pub use manager::RbacManager;
pub use model::{
    Action, CachedDecision, NewGrant, NewRole, Permission, PermissionCheck, PermissionDecision,
    Resource, Role, RoleGrant, Scope, Team, TeamMember, TeamRole, UserRole,
};
pub use store::{CacheKey, RbacStore, SqliteRbacStore};
