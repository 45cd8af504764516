//! The built-in role catalog.
//!
//! Built-ins are seeded with no organization, which makes them visible to
//! every tenant through the store's nil-org fallback. They are immutable:
//! the store rejects updates and deletes.

use std::collections::BTreeSet;

use crate::error::RbacError;
use crate::model::{Action, NewRole, Permission, Resource};
use crate::store::RbacStore;

fn permissions(entries: &[(Resource, &[Action])]) -> BTreeSet<Permission> {
    entries
        .iter()
        .flat_map(|(resource, actions)| {
            actions
                .iter()
                .map(move |action| Permission::new(*resource, *action))
        })
        .collect()
}

fn every_action_on(resources: &[Resource]) -> BTreeSet<Permission> {
    resources
        .iter()
        .flat_map(|resource| {
            Action::all()
                .iter()
                .map(move |action| Permission::new(*resource, *action))
        })
        .collect()
}

fn builtin(name: &str, display_name: &str, description: &str, perms: BTreeSet<Permission>) -> NewRole {
    NewRole {
        name: name.to_string(),
        display_name: display_name.to_string(),
        description: description.to_string(),
        organization_id: None,
        permissions: perms,
        parent_role_id: None,
        is_built_in: true,
        created_by: None,
    }
}

/// The full catalog of built-in roles.
pub fn builtin_roles() -> Vec<NewRole> {
    vec![
        builtin(
            "org:admin",
            "Organization Admin",
            "Full control over everything in the organization",
            every_action_on(&[
                Resource::Module,
                Resource::Version,
                Resource::Documentation,
                Resource::Settings,
                Resource::User,
                Resource::Role,
                Resource::Team,
            ]),
        ),
        builtin(
            "org:developer",
            "Organization Developer",
            "Create and maintain modules, publish versions",
            permissions(&[
                (Resource::Module, &[Action::Create, Action::Read, Action::Update]),
                (Resource::Version, &[Action::Publish, Action::Read]),
                (Resource::Documentation, &[Action::Read, Action::Update]),
            ]),
        ),
        builtin(
            "org:viewer",
            "Organization Viewer",
            "Read-only access to organization modules",
            permissions(&[
                (Resource::Module, &[Action::Read]),
                (Resource::Version, &[Action::Read]),
                (Resource::Documentation, &[Action::Read]),
            ]),
        ),
        builtin(
            "module:owner",
            "Module Owner",
            "Full control over a single module",
            permissions(&[
                (Resource::Module, &[Action::Read, Action::Update, Action::Delete]),
                (
                    Resource::Version,
                    &[Action::Publish, Action::Read, Action::Deprecate],
                ),
                (Resource::Documentation, &[Action::Read, Action::Update]),
            ]),
        ),
        builtin(
            "module:contributor",
            "Module Contributor",
            "Publish versions of a single module",
            permissions(&[
                (Resource::Module, &[Action::Read]),
                (Resource::Version, &[Action::Publish, Action::Read]),
                (Resource::Documentation, &[Action::Read]),
            ]),
        ),
        builtin(
            "module:viewer",
            "Module Viewer",
            "Read-only access to a single module",
            permissions(&[
                (Resource::Module, &[Action::Read]),
                (Resource::Version, &[Action::Read]),
                (Resource::Documentation, &[Action::Read]),
            ]),
        ),
        builtin(
            "system:superadmin",
            "System Superadmin",
            "Every action on every resource, registry-wide",
            every_action_on(Resource::all()),
        ),
    ]
}

/// Insert any built-in roles missing from the store. Idempotent.
pub async fn seed_builtin_roles(store: &dyn RbacStore) -> Result<usize, RbacError> {
    let mut seeded = 0;
    for role in builtin_roles() {
        if store.role_by_name(&role.name, None).await?.is_none() {
            tracing::info!(role = %role.name, "seeding built-in role");
            store.create_role(role).await?;
            seeded += 1;
        }
    }
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_the_seven_builtins() {
        let names: Vec<String> = builtin_roles().into_iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "org:admin",
                "org:developer",
                "org:viewer",
                "module:owner",
                "module:contributor",
                "module:viewer",
                "system:superadmin",
            ]
        );
    }

    #[test]
    fn org_admin_covers_every_action_but_not_organization_resource() {
        let catalog = builtin_roles();
        let admin = catalog.iter().find(|r| r.name == "org:admin").unwrap();
        assert_eq!(admin.permissions.len(), 7 * Action::all().len());
        assert!(!admin
            .permissions
            .iter()
            .any(|p| p.resource == Resource::Organization));
    }

    #[test]
    fn superadmin_covers_the_full_matrix() {
        let catalog = builtin_roles();
        let superadmin = catalog.iter().find(|r| r.name == "system:superadmin").unwrap();
        assert_eq!(
            superadmin.permissions.len(),
            Resource::all().len() * Action::all().len()
        );
    }

    #[test]
    fn builtins_are_flagged_immutable() {
        for role in builtin_roles() {
            assert!(role.is_built_in, "{} must be built-in", role.name);
            assert!(role.organization_id.is_none());
        }
    }
}
