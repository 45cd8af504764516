use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RbacError;

/// The closed set of protected resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Module,
    Version,
    Documentation,
    Settings,
    User,
    Role,
    Team,
    Organization,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Module => "module",
            Resource::Version => "version",
            Resource::Documentation => "documentation",
            Resource::Settings => "settings",
            Resource::User => "user",
            Resource::Role => "role",
            Resource::Team => "team",
            Resource::Organization => "organization",
        }
    }

    pub fn all() -> &'static [Resource] {
        &[
            Resource::Module,
            Resource::Version,
            Resource::Documentation,
            Resource::Settings,
            Resource::User,
            Resource::Role,
            Resource::Team,
            Resource::Organization,
        ]
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(Resource::Module),
            "version" => Ok(Resource::Version),
            "documentation" => Ok(Resource::Documentation),
            "settings" => Ok(Resource::Settings),
            "user" => Ok(Resource::User),
            "role" => Ok(Resource::Role),
            "team" => Ok(Resource::Team),
            "organization" => Ok(Resource::Organization),
            other => Err(RbacError::Validation(format!("unknown resource: {other}"))),
        }
    }
}

/// The closed set of actions a role can permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Publish,
    Deprecate,
    Invite,
    Remove,
    UpdateRole,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Publish => "publish",
            Action::Deprecate => "deprecate",
            Action::Invite => "invite",
            Action::Remove => "remove",
            Action::UpdateRole => "update_role",
        }
    }

    pub fn all() -> &'static [Action] {
        &[
            Action::Create,
            Action::Read,
            Action::Update,
            Action::Delete,
            Action::Publish,
            Action::Deprecate,
            Action::Invite,
            Action::Remove,
            Action::UpdateRole,
        ]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "publish" => Ok(Action::Publish),
            "deprecate" => Ok(Action::Deprecate),
            "invite" => Ok(Action::Invite),
            "remove" => Ok(Action::Remove),
            "update_role" => Ok(Action::UpdateRole),
            other => Err(RbacError::Validation(format!("unknown action: {other}"))),
        }
    }
}

/// A `(resource, action)` pair. Canonical string form is
/// `resource:action`, which is also how permissions serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    pub resource: Resource,
    pub action: Action,
}

impl Permission {
    pub fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for Permission {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s.split_once(':').ok_or_else(|| {
            RbacError::Validation(format!("malformed permission (want resource:action): {s}"))
        })?;
        Ok(Self {
            resource: resource.parse()?,
            action: action.parse()?,
        })
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// How widely a grant applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Organization,
    Module,
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Organization => "organization",
            Scope::Module => "module",
            Scope::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" => Ok(Scope::Organization),
            "module" => Ok(Scope::Module),
            "global" => Ok(Scope::Global),
            other => Err(RbacError::Validation(format!("unknown scope: {other}"))),
        }
    }
}

/// A named bundle of permissions, optionally inheriting from a parent.
///
/// `(name, organization_id)` is unique; a `None` organization marks a
/// globally shared role. Built-in roles are immutable and undeletable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub organization_id: Option<i64>,
    pub permissions: BTreeSet<Permission>,
    pub parent_role_id: Option<i64>,
    pub is_built_in: bool,
    pub is_custom: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a role.
#[derive(Debug, Clone, Default)]
pub struct NewRole {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub organization_id: Option<i64>,
    pub permissions: BTreeSet<Permission>,
    pub parent_role_id: Option<i64>,
    pub is_built_in: bool,
    pub created_by: Option<i64>,
}

/// A role granted to a user at a scope.
///
/// Uniqueness key: `(user_id, role_id, scope, resource_id, organization_id)`
/// with absent ids collapsing to `""` / `0`. A grant whose `expires_at`
/// has passed is semantically inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub scope: Scope,
    pub resource_id: Option<String>,
    pub organization_id: Option<i64>,
    pub granted_by: Option<i64>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for granting a role to a user.
#[derive(Debug, Clone)]
pub struct NewGrant {
    pub user_id: i64,
    pub role_id: i64,
    pub scope: Scope,
    pub resource_id: Option<String>,
    pub organization_id: Option<i64>,
    pub granted_by: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A named group of users within an organization.
/// `(organization_id, name)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership of a user in a team. Memberships do not expire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub team_id: i64,
    pub user_id: i64,
    pub added_at: DateTime<Utc>,
}

/// A role granted to every member of a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRole {
    pub id: i64,
    pub team_id: i64,
    pub role_id: i64,
    pub scope: Scope,
    pub resource_id: Option<String>,
    pub organization_id: Option<i64>,
    pub granted_by: Option<i64>,
    pub granted_at: DateTime<Utc>,
}

/// One resolved grant path: a role together with the scope it was
/// granted at. Parent roles inherit the scope of the grant that pulled
/// them in.
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub role: Role,
    pub scope: Scope,
    pub resource_id: Option<String>,
    pub organization_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The question the evaluator answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub user_id: i64,
    pub permission: Permission,
    pub scope: Scope,
    pub resource_id: Option<String>,
    pub organization_id: Option<i64>,
}

/// The evaluator's answer. `matched_roles` lists the role names that
/// granted the permission; empty on deny or on a cache hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: String,
    pub matched_roles: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// A memoized permission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedDecision {
    pub allowed: bool,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_canonical_form_round_trips() {
        let perm = Permission::new(Resource::Module, Action::Read);
        assert_eq!(perm.to_string(), "module:read");
        assert_eq!("module:read".parse::<Permission>().unwrap(), perm);

        let update_role = Permission::new(Resource::Role, Action::UpdateRole);
        assert_eq!(update_role.to_string(), "role:update_role");
        assert_eq!(
            "role:update_role".parse::<Permission>().unwrap(),
            update_role
        );
    }

    #[test]
    fn permission_serializes_as_canonical_string() {
        let perm = Permission::new(Resource::Version, Action::Publish);
        assert_eq!(
            serde_json::to_string(&perm).unwrap(),
            "\"version:publish\""
        );
        let back: Permission = serde_json::from_str("\"version:publish\"").unwrap();
        assert_eq!(back, perm);
    }

    #[test]
    fn malformed_permissions_are_rejected() {
        assert!("module".parse::<Permission>().is_err());
        assert!("module:frobnicate".parse::<Permission>().is_err());
        assert!("widget:read".parse::<Permission>().is_err());
    }

    #[test]
    fn scope_names_round_trip() {
        for scope in [Scope::Organization, Scope::Module, Scope::Global] {
            assert_eq!(scope.as_str().parse::<Scope>().unwrap(), scope);
        }
    }
}
