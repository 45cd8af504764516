use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use spoke_core::Clock;

use crate::config::RbacConfig;
use crate::error::RbacError;
use crate::model::{Permission, PermissionCheck, PermissionDecision, RoleGrant};
use crate::store::{CacheKey, RbacStore};

/// Evaluates permission checks against the store, through the decision
/// cache.
///
/// Cache behavior is best-effort by design: a write failure is swallowed
/// and a read failure degrades to a fresh evaluation. Correctness comes
/// from [`RbacStore::invalidate_cache`] being called by every mutating
/// path before it reports success.
pub struct PermissionChecker {
    store: Arc<dyn RbacStore>,
    config: RbacConfig,
    clock: Arc<dyn Clock>,
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn RbacStore>, config: RbacConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Decide whether the check's user holds the permission in scope.
    pub async fn check_permission(
        &self,
        check: &PermissionCheck,
    ) -> Result<PermissionDecision, RbacError> {
        let now = self.clock.now();
        let key = CacheKey::from_check(check);

        if self.config.cache_enabled() {
            match self.store.cached_decision(&key, now).await {
                Ok(Some(hit)) => {
                    return Ok(PermissionDecision {
                        allowed: hit.allowed,
                        reason: "cached result".to_string(),
                        matched_roles: Vec::new(),
                        checked_at: now,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(error = %err, user_id = check.user_id, "cache read failed, evaluating fresh");
                }
            }
        }

        let grants = self.effective_grants(check.user_id, now).await?;
        let mut matched_roles: Vec<String> = Vec::new();
        for grant in &grants {
            if grant.role.permissions.contains(&check.permission)
                && scope_matches(grant, check)
                && !matched_roles.contains(&grant.role.name)
            {
                matched_roles.push(grant.role.name.clone());
            }
        }

        let allowed = !matched_roles.is_empty();
        let reason = if allowed {
            format!("granted by role(s): {}", matched_roles.join(", "))
        } else {
            "no role grants this permission in scope".to_string()
        };

        if self.config.cache_enabled() {
            let expires_at = cache_expiry(now, &self.config);
            if let Err(err) = self.store.cache_decision(&key, allowed, expires_at).await {
                tracing::debug!(error = %err, user_id = check.user_id, "cache write failed");
            }
        }

        Ok(PermissionDecision {
            allowed,
            reason,
            matched_roles,
            checked_at: now,
        })
    }

    /// The union of permissions across the user's resolved roles,
    /// deduplicated by canonical form, sorted.
    pub async fn effective_permissions(
        &self,
        user_id: i64,
    ) -> Result<Vec<Permission>, RbacError> {
        let now = self.clock.now();
        let grants = self.effective_grants(user_id, now).await?;
        let mut permissions: Vec<Permission> = grants
            .iter()
            .flat_map(|g| g.role.permissions.iter().copied())
            .collect();
        permissions.sort_by_key(|p| p.to_string());
        permissions.dedup();
        Ok(permissions)
    }

    /// Every grant path that applies to the user right now: direct grants
    /// (minus expired), team-inherited grants (when teams are enabled),
    /// and, per grant, the transitive closure over parent roles.
    ///
    /// Parent resolution is guarded by a visited set keyed on role id, so
    /// a parent cycle in stored data terminates. Duplicate paths with the
    /// same `(role, scope, resource, organization)` collapse to one.
    pub async fn effective_grants(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleGrant>, RbacError> {
        let mut base = self.store.user_role_grants(user_id).await?;
        base.retain(|g| g.expires_at.map_or(true, |expires| expires > now));
        if self.config.enable_teams {
            base.extend(self.store.team_role_grants(user_id).await?);
        }

        let mut resolved: Vec<RoleGrant> = Vec::new();
        let mut seen: HashSet<(i64, String)> = HashSet::new();
        for grant in base {
            let mut chain_visited: HashSet<i64> = HashSet::new();
            let mut pending = vec![grant];
            while let Some(current) = pending.pop() {
                if !chain_visited.insert(current.role.id) {
                    continue;
                }
                if self.config.enable_role_inheritance {
                    if let Some(parent_id) = current.role.parent_role_id {
                        if let Some(parent) = self.store.role(parent_id).await? {
                            pending.push(RoleGrant {
                                role: parent,
                                scope: current.scope,
                                resource_id: current.resource_id.clone(),
                                organization_id: current.organization_id,
                                expires_at: current.expires_at,
                            });
                        }
                    }
                }
                let dedup_key = (
                    current.role.id,
                    format!(
                        "{}|{}|{}",
                        current.scope,
                        current.resource_id.as_deref().unwrap_or(""),
                        current.organization_id.unwrap_or(0)
                    ),
                );
                if seen.insert(dedup_key) {
                    resolved.push(current);
                }
            }
        }
        Ok(resolved)
    }
}

/// The documented scope hierarchy: a grant matches when it is global,
/// when it is organization-wide for the check's organization, or when it
/// names the check's resource (and does not name a different
/// organization).
fn scope_matches(grant: &RoleGrant, check: &PermissionCheck) -> bool {
    use crate::model::Scope;
    match grant.scope {
        Scope::Global => true,
        Scope::Organization => {
            grant.organization_id.is_some() && grant.organization_id == check.organization_id
        }
        Scope::Module => {
            grant.resource_id.is_some()
                && grant.resource_id == check.resource_id
                && (grant.organization_id.is_none()
                    || grant.organization_id == check.organization_id)
        }
    }
}

fn cache_expiry(now: DateTime<Utc>, config: &RbacConfig) -> DateTime<Utc> {
    let ttl = Duration::from_std(config.cache_ttl).unwrap_or(Duration::MAX);
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Permission, Resource, Role, Scope};
    use std::collections::BTreeSet;

    fn role(name: &str, permissions: &[Permission]) -> Role {
        Role {
            id: 1,
            name: name.to_string(),
            display_name: name.to_string(),
            description: String::new(),
            organization_id: None,
            permissions: permissions.iter().copied().collect::<BTreeSet<_>>(),
            parent_role_id: None,
            is_built_in: false,
            is_custom: true,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn grant(scope: Scope, resource_id: Option<&str>, org: Option<i64>) -> RoleGrant {
        RoleGrant {
            role: role("r", &[Permission::new(Resource::Module, Action::Read)]),
            scope,
            resource_id: resource_id.map(str::to_string),
            organization_id: org,
            expires_at: None,
        }
    }

    fn check(scope: Scope, resource_id: Option<&str>, org: Option<i64>) -> PermissionCheck {
        PermissionCheck {
            user_id: 1,
            permission: Permission::new(Resource::Module, Action::Read),
            scope,
            resource_id: resource_id.map(str::to_string),
            organization_id: org,
        }
    }

    #[test]
    fn global_grant_matches_everything() {
        let g = grant(Scope::Global, None, None);
        assert!(scope_matches(&g, &check(Scope::Organization, None, Some(7))));
        assert!(scope_matches(&g, &check(Scope::Module, Some("m"), None)));
    }

    #[test]
    fn organization_grant_requires_same_org() {
        let g = grant(Scope::Organization, None, Some(7));
        assert!(scope_matches(&g, &check(Scope::Organization, None, Some(7))));
        assert!(!scope_matches(&g, &check(Scope::Organization, None, Some(8))));
        assert!(!scope_matches(&g, &check(Scope::Organization, None, None)));
    }

    #[test]
    fn organization_grant_without_org_never_matches() {
        let g = grant(Scope::Organization, None, None);
        assert!(!scope_matches(&g, &check(Scope::Organization, None, None)));
    }

    #[test]
    fn module_grant_requires_same_resource() {
        let g = grant(Scope::Module, Some("common"), None);
        assert!(scope_matches(&g, &check(Scope::Module, Some("common"), Some(7))));
        assert!(!scope_matches(&g, &check(Scope::Module, Some("other"), Some(7))));
    }

    #[test]
    fn module_grant_with_org_requires_same_org() {
        let g = grant(Scope::Module, Some("common"), Some(7));
        assert!(scope_matches(&g, &check(Scope::Module, Some("common"), Some(7))));
        assert!(!scope_matches(&g, &check(Scope::Module, Some("common"), Some(8))));
    }
}
