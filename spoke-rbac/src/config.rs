use std::time::Duration;

/// Tuning knobs for the RBAC evaluator.
#[derive(Debug, Clone)]
pub struct RbacConfig {
    /// Lifetime of cached permission decisions. Zero disables the cache
    /// entirely: every check evaluates against the store.
    pub cache_ttl: Duration,
    /// When false, team-inherited grants are skipped during evaluation
    /// and every team operation on the manager errors.
    pub enable_teams: bool,
    /// When false, every role is treated as having no parent.
    pub enable_role_inheritance: bool,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            enable_teams: true,
            enable_role_inheritance: true,
        }
    }
}

impl RbacConfig {
    /// A config with the decision cache turned off.
    pub fn without_cache() -> Self {
        Self {
            cache_ttl: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn cache_enabled(&self) -> bool {
        !self.cache_ttl.is_zero()
    }
}
