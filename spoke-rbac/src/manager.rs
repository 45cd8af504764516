use std::sync::Arc;

use spoke_core::Clock;

use crate::builtin::seed_builtin_roles;
use crate::checker::PermissionChecker;
use crate::config::RbacConfig;
use crate::error::RbacError;
use crate::model::{
    NewGrant, NewRole, Permission, PermissionCheck, PermissionDecision, Role, Scope, Team,
    TeamMember, TeamRole, UserRole,
};
use crate::store::RbacStore;

/// The orchestrating write path of the RBAC subsystem.
///
/// Wires the store and the evaluator together and owns the invariant the
/// cache depends on: every grant, revoke, membership change, or role
/// mutation invalidates the affected users' cached decisions before the
/// call returns.
pub struct RbacManager {
    store: Arc<dyn RbacStore>,
    checker: PermissionChecker,
    config: RbacConfig,
}

impl RbacManager {
    pub fn new(store: Arc<dyn RbacStore>, config: RbacConfig, clock: Arc<dyn Clock>) -> Self {
        let checker = PermissionChecker::new(store.clone(), config.clone(), clock);
        Self {
            store,
            checker,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RbacStore> {
        &self.store
    }

    pub fn checker(&self) -> &PermissionChecker {
        &self.checker
    }

    /// Insert any missing built-in roles. Run once at startup.
    pub async fn seed_builtin_roles(&self) -> Result<usize, RbacError> {
        seed_builtin_roles(self.store.as_ref()).await
    }

    pub async fn check_permission(
        &self,
        check: &PermissionCheck,
    ) -> Result<PermissionDecision, RbacError> {
        self.checker.check_permission(check).await
    }

    pub async fn effective_permissions(&self, user_id: i64) -> Result<Vec<Permission>, RbacError> {
        self.checker.effective_permissions(user_id).await
    }

    // ── roles ────────────────────────────────────────────────────────────

    pub async fn create_role(&self, role: NewRole) -> Result<Role, RbacError> {
        self.store.create_role(role).await
    }

    pub async fn role_by_name(
        &self,
        name: &str,
        organization_id: Option<i64>,
    ) -> Result<Option<Role>, RbacError> {
        self.store.role_by_name(name, organization_id).await
    }

    pub async fn list_roles(&self, organization_id: Option<i64>) -> Result<Vec<Role>, RbacError> {
        self.store.list_roles(organization_id).await
    }

    /// Update a role's definition. Everyone holding the role re-evaluates.
    pub async fn update_role(&self, role: &Role) -> Result<(), RbacError> {
        self.store.update_role(role).await?;
        self.invalidate_users(self.store.users_with_role(role.id).await?)
            .await
    }

    /// Delete a role and its grants. Everyone who held it re-evaluates.
    pub async fn delete_role(&self, role_id: i64) -> Result<(), RbacError> {
        let affected = self.store.users_with_role(role_id).await?;
        self.store.delete_role(role_id).await?;
        self.invalidate_users(affected).await
    }

    // ── user grants ──────────────────────────────────────────────────────

    pub async fn grant_role(&self, grant: NewGrant) -> Result<UserRole, RbacError> {
        let user_id = grant.user_id;
        let granted = self.store.grant_user_role(grant).await?;
        self.store.invalidate_cache(user_id).await?;
        Ok(granted)
    }

    pub async fn revoke_role(
        &self,
        user_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
    ) -> Result<bool, RbacError> {
        let revoked = self
            .store
            .revoke_user_role(user_id, role_id, scope, resource_id, organization_id)
            .await?;
        self.store.invalidate_cache(user_id).await?;
        Ok(revoked)
    }

    pub async fn user_roles(&self, user_id: i64) -> Result<Vec<UserRole>, RbacError> {
        self.store.user_roles(user_id).await
    }

    // ── teams ────────────────────────────────────────────────────────────

    pub async fn create_team(
        &self,
        organization_id: i64,
        name: &str,
        description: &str,
    ) -> Result<Team, RbacError> {
        self.ensure_teams_enabled()?;
        self.store.create_team(organization_id, name, description).await
    }

    pub async fn team(&self, id: i64) -> Result<Option<Team>, RbacError> {
        self.ensure_teams_enabled()?;
        self.store.team(id).await
    }

    /// Delete a team. Every member re-evaluates.
    pub async fn delete_team(&self, team_id: i64) -> Result<(), RbacError> {
        self.ensure_teams_enabled()?;
        let members = self.store.team_members(team_id).await?;
        self.store.delete_team(team_id).await?;
        self.invalidate_members(members).await
    }

    pub async fn add_team_member(&self, team_id: i64, user_id: i64) -> Result<(), RbacError> {
        self.ensure_teams_enabled()?;
        self.store.add_team_member(team_id, user_id).await?;
        self.store.invalidate_cache(user_id).await
    }

    pub async fn remove_team_member(&self, team_id: i64, user_id: i64) -> Result<bool, RbacError> {
        self.ensure_teams_enabled()?;
        let removed = self.store.remove_team_member(team_id, user_id).await?;
        self.store.invalidate_cache(user_id).await?;
        Ok(removed)
    }

    pub async fn team_members(&self, team_id: i64) -> Result<Vec<TeamMember>, RbacError> {
        self.ensure_teams_enabled()?;
        self.store.team_members(team_id).await
    }

    /// Grant a role to a team. Every current member re-evaluates.
    pub async fn grant_team_role(
        &self,
        team_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
        granted_by: Option<i64>,
    ) -> Result<TeamRole, RbacError> {
        self.ensure_teams_enabled()?;
        let granted = self
            .store
            .grant_team_role(team_id, role_id, scope, resource_id, organization_id, granted_by)
            .await?;
        self.invalidate_members(self.store.team_members(team_id).await?)
            .await?;
        Ok(granted)
    }

    /// Revoke a role from a team. Every current member re-evaluates.
    pub async fn revoke_team_role(
        &self,
        team_id: i64,
        role_id: i64,
        scope: Scope,
        resource_id: Option<&str>,
        organization_id: Option<i64>,
    ) -> Result<bool, RbacError> {
        self.ensure_teams_enabled()?;
        let revoked = self
            .store
            .revoke_team_role(team_id, role_id, scope, resource_id, organization_id)
            .await?;
        self.invalidate_members(self.store.team_members(team_id).await?)
            .await?;
        Ok(revoked)
    }

    // ── internals ────────────────────────────────────────────────────────

    fn ensure_teams_enabled(&self) -> Result<(), RbacError> {
        if self.config.enable_teams {
            Ok(())
        } else {
            Err(RbacError::TeamsDisabled)
        }
    }

    async fn invalidate_users(&self, users: Vec<i64>) -> Result<(), RbacError> {
        for user_id in users {
            self.store.invalidate_cache(user_id).await?;
        }
        Ok(())
    }

    async fn invalidate_members(&self, members: Vec<TeamMember>) -> Result<(), RbacError> {
        self.invalidate_users(members.into_iter().map(|m| m.user_id).collect())
            .await
    }
}
