use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use spoke_core::Clock;

use crate::error::RbacError;
use crate::model::{
    CachedDecision, NewGrant, NewRole, Permission, PermissionCheck, Role, RoleGrant, Scope, Team,
    TeamMember, TeamRole, UserRole,
};

/// Fully normalized key of one cached decision. Absent resource and
/// organization ids collapse to `""` / `0` so the storage key is total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub user_id: i64,
    pub permission: String,
    pub scope: String,
    pub resource_id: String,
    pub organization_id: i64,
}

impl CacheKey {
    pub fn from_check(check: &PermissionCheck) -> Self {
        Self {
            user_id: check.user_id,
            permission: check.permission.to_string(),
            scope: check.scope.as_str().to_string(),
            resource_id: check.resource_id.clone().unwrap_or_default(),
            organization_id: check.organization_id.unwrap_or(0),
        }
    }
}

/// Persistence port for roles, grants, teams, and the decision cache.
///
/// Expiry filtering of grants happens in the evaluator against its
/// injected clock; the store returns grants with their raw `expires_at`.
#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn create_role(&self, role: NewRole) -> Result<Role, RbacError>;
    async fn role(&self, id: i64) -> Result<Option<Role>, RbacError>;
    /// Organization-specific role first, then the global (nil-org)
    /// fallback — this is how built-in roles are shared across tenants.
    async fn role_by_name(
        &self,
        name: &str,
        organization_id: Option<i64>,
    ) -> Result<Option<Role>, RbacError>;
    async fn update_role(&self, role: &Role) -> Result<(), RbacError>;
    /// Deletes the role and every user/team grant that references it.
    async fn delete_role(&self, id: i64) -> Result<(), RbacError>;
    async fn list_roles(&self, organization_id: Option<i64>) -> Result<Vec<Role>, RbacError>;

    async fn grant_user_role(&self, grant: NewGrant) -> Result<UserRole, RbacError>;
    async fn revoke_user_role(
        &self,
        user_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
    ) -> Result<bool, RbacError>;
    async fn user_roles(&self, user_id: i64) -> Result<Vec<UserRole>, RbacError>;
    /// Direct grants joined with their roles.
    async fn user_role_grants(&self, user_id: i64) -> Result<Vec<RoleGrant>, RbacError>;
    /// Grants inherited through team membership, joined with their roles.
    async fn team_role_grants(&self, user_id: i64) -> Result<Vec<RoleGrant>, RbacError>;
    /// Every user holding the role directly or through a team.
    async fn users_with_role(&self, role_id: i64) -> Result<Vec<i64>, RbacError>;

    async fn create_team(
        &self,
        organization_id: i64,
        name: &str,
        description: &str,
    ) -> Result<Team, RbacError>;
    async fn team(&self, id: i64) -> Result<Option<Team>, RbacError>;
    /// Deletes the team, its memberships, and its role grants.
    async fn delete_team(&self, id: i64) -> Result<(), RbacError>;
    async fn add_team_member(&self, team_id: i64, user_id: i64) -> Result<(), RbacError>;
    async fn remove_team_member(&self, team_id: i64, user_id: i64) -> Result<bool, RbacError>;
    async fn team_members(&self, team_id: i64) -> Result<Vec<TeamMember>, RbacError>;
    async fn grant_team_role(
        &self,
        team_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
        granted_by: Option<i64>,
    ) -> Result<TeamRole, RbacError>;
    async fn revoke_team_role(
        &self,
        team_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
    ) -> Result<bool, RbacError>;

    /// An unexpired cached decision for the key, if any.
    async fn cached_decision(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedDecision>, RbacError>;
    /// Insert or overwrite the cached decision for the key.
    async fn cache_decision(
        &self,
        key: &CacheKey,
        allowed: bool,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RbacError>;
    /// Drop every cached decision for the user.
    async fn invalidate_cache(&self, user_id: i64) -> Result<(), RbacError>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        display_name TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        organization_id INTEGER,
        permissions TEXT NOT NULL DEFAULT '[]',
        parent_role_id INTEGER,
        is_built_in INTEGER NOT NULL DEFAULT 0,
        is_custom INTEGER NOT NULL DEFAULT 1,
        created_by INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_roles_name_org
        ON roles (name, COALESCE(organization_id, 0))",
    "CREATE TABLE IF NOT EXISTS user_roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        role_id INTEGER NOT NULL,
        scope TEXT NOT NULL,
        resource_id TEXT,
        organization_id INTEGER,
        granted_by INTEGER,
        granted_at TEXT NOT NULL,
        expires_at TEXT
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_user_roles_grant
        ON user_roles (user_id, role_id, scope, COALESCE(resource_id, ''), COALESCE(organization_id, 0))",
    "CREATE TABLE IF NOT EXISTS teams (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (organization_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS team_members (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        team_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        added_at TEXT NOT NULL,
        UNIQUE (team_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS team_roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        team_id INTEGER NOT NULL,
        role_id INTEGER NOT NULL,
        scope TEXT NOT NULL,
        resource_id TEXT,
        organization_id INTEGER,
        granted_by INTEGER,
        granted_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_team_roles_grant
        ON team_roles (team_id, role_id, scope, COALESCE(resource_id, ''), COALESCE(organization_id, 0))",
    "CREATE TABLE IF NOT EXISTS permission_cache (
        user_id INTEGER NOT NULL,
        permission TEXT NOT NULL,
        scope TEXT NOT NULL,
        resource_id TEXT NOT NULL DEFAULT '',
        organization_id INTEGER NOT NULL DEFAULT 0,
        allowed INTEGER NOT NULL,
        expires_at TEXT NOT NULL,
        PRIMARY KEY (user_id, permission, scope, resource_id, organization_id)
    )",
];

const ROLE_COLUMNS: &str = "r.id, r.name, r.display_name, r.description, r.organization_id, \
     r.permissions, r.parent_role_id, r.is_built_in, r.is_custom, r.created_by, \
     r.created_at, r.updated_at";

/// SQLite-backed [`RbacStore`].
#[derive(Clone)]
pub struct SqliteRbacStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteRbacStore {
    /// Wrap an existing pool. Call [`migrate`](Self::migrate) before use.
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Open (or create) a database at `url`, e.g. `sqlite://spoke.db`.
    pub async fn connect(url: &str, clock: Arc<dyn Clock>) -> Result<Self, RbacError> {
        let pool = SqlitePool::connect(url).await?;
        Ok(Self::new(pool, clock))
    }

    /// A private in-memory database, for tests and embedding.
    ///
    /// One connection only: each SQLite `:memory:` connection is its own
    /// database, so a wider pool would see different data per connection.
    pub async fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, RbacError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool, clock);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema. Idempotent.
    pub async fn migrate(&self) -> Result<(), RbacError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn role_from_row(row: &SqliteRow) -> Result<Role, RbacError> {
        let permissions_json: String = row.try_get("permissions")?;
        let permissions: BTreeSet<Permission> = serde_json::from_str(&permissions_json)?;
        Ok(Role {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            display_name: row.try_get("display_name")?,
            description: row.try_get("description")?,
            organization_id: row.try_get("organization_id")?,
            permissions,
            parent_role_id: row.try_get("parent_role_id")?,
            is_built_in: row.try_get("is_built_in")?,
            is_custom: row.try_get("is_custom")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn grant_from_row(row: &SqliteRow, with_expiry: bool) -> Result<RoleGrant, RbacError> {
        let scope: String = row.try_get("grant_scope")?;
        Ok(RoleGrant {
            role: Self::role_from_row(row)?,
            scope: scope.parse()?,
            resource_id: row.try_get("grant_resource_id")?,
            organization_id: row.try_get("grant_organization_id")?,
            expires_at: if with_expiry {
                row.try_get("grant_expires_at")?
            } else {
                None
            },
        })
    }

    async fn require_role(&self, id: i64) -> Result<Role, RbacError> {
        self.role(id)
            .await?
            .ok_or_else(|| RbacError::RoleNotFound(id.to_string()))
    }

    async fn require_team(&self, id: i64) -> Result<Team, RbacError> {
        self.team(id)
            .await?
            .ok_or_else(|| RbacError::TeamNotFound(id.to_string()))
    }
}

#[async_trait]
impl RbacStore for SqliteRbacStore {
    async fn create_role(&self, role: NewRole) -> Result<Role, RbacError> {
        if role.name.is_empty() {
            return Err(RbacError::Validation("role name must not be empty".into()));
        }
        let now = self.clock.now();
        let permissions = serde_json::to_string(&role.permissions)?;
        let result = sqlx::query(
            "INSERT INTO roles (name, display_name, description, organization_id, permissions,
                 parent_role_id, is_built_in, is_custom, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&role.name)
        .bind(&role.display_name)
        .bind(&role.description)
        .bind(role.organization_id)
        .bind(&permissions)
        .bind(role.parent_role_id)
        .bind(role.is_built_in)
        .bind(!role.is_built_in)
        .bind(role.created_by)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Role {
            id: result.last_insert_rowid(),
            name: role.name,
            display_name: role.display_name,
            description: role.description,
            organization_id: role.organization_id,
            permissions: role.permissions,
            parent_role_id: role.parent_role_id,
            is_built_in: role.is_built_in,
            is_custom: !role.is_built_in,
            created_by: role.created_by,
            created_at: now,
            updated_at: now,
        })
    }

    async fn role(&self, id: i64) -> Result<Option<Role>, RbacError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::role_from_row).transpose()
    }

    async fn role_by_name(
        &self,
        name: &str,
        organization_id: Option<i64>,
    ) -> Result<Option<Role>, RbacError> {
        if let Some(org) = organization_id {
            let row = sqlx::query(&format!(
                "SELECT {ROLE_COLUMNS} FROM roles r WHERE r.name = ? AND r.organization_id = ?"
            ))
            .bind(name)
            .bind(org)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                return Ok(Some(Self::role_from_row(&row)?));
            }
        }
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles r WHERE r.name = ? AND r.organization_id IS NULL"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::role_from_row).transpose()
    }

    async fn update_role(&self, role: &Role) -> Result<(), RbacError> {
        let existing = self.require_role(role.id).await?;
        if existing.is_built_in {
            return Err(RbacError::ImmutableBuiltInRole(existing.name));
        }
        let permissions = serde_json::to_string(&role.permissions)?;
        sqlx::query(
            "UPDATE roles SET name = ?, display_name = ?, description = ?, permissions = ?,
                 parent_role_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&role.name)
        .bind(&role.display_name)
        .bind(&role.description)
        .bind(&permissions)
        .bind(role.parent_role_id)
        .bind(self.clock.now())
        .bind(role.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> Result<(), RbacError> {
        let existing = self.require_role(id).await?;
        if existing.is_built_in {
            return Err(RbacError::ImmutableBuiltInRole(existing.name));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM user_roles WHERE role_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM team_roles WHERE role_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_roles(&self, organization_id: Option<i64>) -> Result<Vec<Role>, RbacError> {
        let rows = match organization_id {
            Some(org) => {
                sqlx::query(&format!(
                    "SELECT {ROLE_COLUMNS} FROM roles r
                     WHERE r.organization_id = ? OR r.organization_id IS NULL
                     ORDER BY r.name"
                ))
                .bind(org)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ROLE_COLUMNS} FROM roles r
                     WHERE r.organization_id IS NULL
                     ORDER BY r.name"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::role_from_row).collect()
    }

    async fn grant_user_role(&self, grant: NewGrant) -> Result<UserRole, RbacError> {
        self.require_role(grant.role_id).await?;
        let now = self.clock.now();
        // Replace on the uniqueness key: a re-grant refreshes the grantor,
        // grant time, and expiry.
        let result = sqlx::query(
            "INSERT OR REPLACE INTO user_roles
                 (user_id, role_id, scope, resource_id, organization_id, granted_by, granted_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(grant.user_id)
        .bind(grant.role_id)
        .bind(grant.scope.as_str())
        .bind(&grant.resource_id)
        .bind(grant.organization_id)
        .bind(grant.granted_by)
        .bind(now)
        .bind(grant.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(UserRole {
            id: result.last_insert_rowid(),
            user_id: grant.user_id,
            role_id: grant.role_id,
            scope: grant.scope,
            resource_id: grant.resource_id,
            organization_id: grant.organization_id,
            granted_by: grant.granted_by,
            granted_at: now,
            expires_at: grant.expires_at,
        })
    }

    async fn revoke_user_role(
        &self,
        user_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
    ) -> Result<bool, RbacError> {
        let result = sqlx::query(
            "DELETE FROM user_roles
             WHERE user_id = ? AND role_id = ? AND scope = ?
               AND COALESCE(resource_id, '') = ? AND COALESCE(organization_id, 0) = ?",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(scope.as_str())
        .bind(resource_id.unwrap_or(""))
        .bind(organization_id.unwrap_or(0))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn user_roles(&self, user_id: i64) -> Result<Vec<UserRole>, RbacError> {
        let rows = sqlx::query(
            "SELECT id, user_id, role_id, scope, resource_id, organization_id,
                    granted_by, granted_at, expires_at
             FROM user_roles WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let scope: String = row.try_get("scope")?;
                Ok(UserRole {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    role_id: row.try_get("role_id")?,
                    scope: scope.parse()?,
                    resource_id: row.try_get("resource_id")?,
                    organization_id: row.try_get("organization_id")?,
                    granted_by: row.try_get("granted_by")?,
                    granted_at: row.try_get("granted_at")?,
                    expires_at: row.try_get("expires_at")?,
                })
            })
            .collect()
    }

    async fn user_role_grants(&self, user_id: i64) -> Result<Vec<RoleGrant>, RbacError> {
        let rows = sqlx::query(&format!(
            "SELECT ur.scope AS grant_scope, ur.resource_id AS grant_resource_id,
                    ur.organization_id AS grant_organization_id, ur.expires_at AS grant_expires_at,
                    {ROLE_COLUMNS}
             FROM user_roles ur
             JOIN roles r ON r.id = ur.role_id
             WHERE ur.user_id = ?
             ORDER BY ur.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| Self::grant_from_row(row, true)).collect()
    }

    async fn team_role_grants(&self, user_id: i64) -> Result<Vec<RoleGrant>, RbacError> {
        let rows = sqlx::query(&format!(
            "SELECT tr.scope AS grant_scope, tr.resource_id AS grant_resource_id,
                    tr.organization_id AS grant_organization_id,
                    {ROLE_COLUMNS}
             FROM team_roles tr
             JOIN team_members tm ON tm.team_id = tr.team_id
             JOIN roles r ON r.id = tr.role_id
             WHERE tm.user_id = ?
             ORDER BY tr.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| Self::grant_from_row(row, false)).collect()
    }

    async fn users_with_role(&self, role_id: i64) -> Result<Vec<i64>, RbacError> {
        let rows = sqlx::query(
            "SELECT user_id FROM user_roles WHERE role_id = ?
             UNION
             SELECT tm.user_id FROM team_members tm
             JOIN team_roles tr ON tr.team_id = tm.team_id
             WHERE tr.role_id = ?",
        )
        .bind(role_id)
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("user_id").map_err(RbacError::from))
            .collect()
    }

    async fn create_team(
        &self,
        organization_id: i64,
        name: &str,
        description: &str,
    ) -> Result<Team, RbacError> {
        if name.is_empty() {
            return Err(RbacError::Validation("team name must not be empty".into()));
        }
        let now = self.clock.now();
        let result = sqlx::query(
            "INSERT INTO teams (organization_id, name, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(organization_id)
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Team {
            id: result.last_insert_rowid(),
            organization_id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn team(&self, id: i64) -> Result<Option<Team>, RbacError> {
        let row = sqlx::query(
            "SELECT id, organization_id, name, description, created_at, updated_at
             FROM teams WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Team {
                id: row.try_get("id")?,
                organization_id: row.try_get("organization_id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn delete_team(&self, id: i64) -> Result<(), RbacError> {
        self.require_team(id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM team_members WHERE team_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM team_roles WHERE team_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM teams WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_team_member(&self, team_id: i64, user_id: i64) -> Result<(), RbacError> {
        self.require_team(team_id).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO team_members (team_id, user_id, added_at) VALUES (?, ?, ?)",
        )
        .bind(team_id)
        .bind(user_id)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_team_member(&self, team_id: i64, user_id: i64) -> Result<bool, RbacError> {
        let result = sqlx::query("DELETE FROM team_members WHERE team_id = ? AND user_id = ?")
            .bind(team_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn team_members(&self, team_id: i64) -> Result<Vec<TeamMember>, RbacError> {
        let rows = sqlx::query(
            "SELECT team_id, user_id, added_at FROM team_members
             WHERE team_id = ? ORDER BY user_id",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TeamMember {
                    team_id: row.try_get("team_id")?,
                    user_id: row.try_get("user_id")?,
                    added_at: row.try_get("added_at")?,
                })
            })
            .collect()
    }

    async fn grant_team_role(
        &self,
        team_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
        granted_by: Option<i64>,
    ) -> Result<TeamRole, RbacError> {
        self.require_team(team_id).await?;
        self.require_role(role_id).await?;
        let now = self.clock.now();
        let result = sqlx::query(
            "INSERT OR REPLACE INTO team_roles
                 (team_id, role_id, scope, resource_id, organization_id, granted_by, granted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(team_id)
        .bind(role_id)
        .bind(scope.as_str())
        .bind(resource_id)
        .bind(organization_id)
        .bind(granted_by)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(TeamRole {
            id: result.last_insert_rowid(),
            team_id,
            role_id,
            scope,
            resource_id: resource_id.map(str::to_string),
            organization_id,
            granted_by,
            granted_at: now,
        })
    }

    async fn revoke_team_role(
        &self,
        team_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
    ) -> Result<bool, RbacError> {
        let result = sqlx::query(
            "DELETE FROM team_roles
             WHERE team_id = ? AND role_id = ? AND scope = ?
               AND COALESCE(resource_id, '') = ? AND COALESCE(organization_id, 0) = ?",
        )
        .bind(team_id)
        .bind(role_id)
        .bind(scope.as_str())
        .bind(resource_id.unwrap_or(""))
        .bind(organization_id.unwrap_or(0))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cached_decision(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedDecision>, RbacError> {
        let row = sqlx::query(
            "SELECT allowed, expires_at FROM permission_cache
             WHERE user_id = ? AND permission = ? AND scope = ?
               AND resource_id = ? AND organization_id = ?",
        )
        .bind(key.user_id)
        .bind(&key.permission)
        .bind(&key.scope)
        .bind(&key.resource_id)
        .bind(key.organization_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decision = CachedDecision {
            allowed: row.try_get("allowed")?,
            expires_at: row.try_get("expires_at")?,
        };
        if decision.expires_at <= now {
            // Lazily evict, like any TTL cache read.
            sqlx::query(
                "DELETE FROM permission_cache
                 WHERE user_id = ? AND permission = ? AND scope = ?
                   AND resource_id = ? AND organization_id = ?",
            )
            .bind(key.user_id)
            .bind(&key.permission)
            .bind(&key.scope)
            .bind(&key.resource_id)
            .bind(key.organization_id)
            .execute(&self.pool)
            .await?;
            return Ok(None);
        }
        Ok(Some(decision))
    }

    async fn cache_decision(
        &self,
        key: &CacheKey,
        allowed: bool,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RbacError> {
        sqlx::query(
            "INSERT OR REPLACE INTO permission_cache
                 (user_id, permission, scope, resource_id, organization_id, allowed, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.user_id)
        .bind(&key.permission)
        .bind(&key.scope)
        .bind(&key.resource_id)
        .bind(key.organization_id)
        .bind(allowed)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate_cache(&self, user_id: i64) -> Result<(), RbacError> {
        sqlx::query("DELETE FROM permission_cache WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
