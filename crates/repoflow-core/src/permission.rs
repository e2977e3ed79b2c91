//! Permission scopes: what a job may do, fixed when the job is defined.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resources a job can be granted access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Actions,
    Checks,
    Contents,
    Deployments,
    Issues,
    PullRequests,
    Statuses,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Actions,
        Resource::Checks,
        Resource::Contents,
        Resource::Deployments,
        Resource::Issues,
        Resource::PullRequests,
        Resource::Statuses,
    ];
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Resource::Actions => "actions",
            Resource::Checks => "checks",
            Resource::Contents => "contents",
            Resource::Deployments => "deployments",
            Resource::Issues => "issues",
            Resource::PullRequests => "pull_requests",
            Resource::Statuses => "statuses",
        };
        f.write_str(name)
    }
}

/// Access level, ordered `None < Read < Write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    Read,
    Write,
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AccessLevel::None => "none",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
        })
    }
}

/// A set of `(resource, level)` grants.
///
/// Resources without an explicit entry are readable: the default scope is
/// read-only on everything. When a scope is used as an action *requirement*,
/// only its explicit entries count.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionScope {
    grants: BTreeMap<Resource, AccessLevel>,
}

/// One resource where a scope falls short of a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeShortfall {
    pub resource: Resource,
    pub required: AccessLevel,
    pub granted: AccessLevel,
}

impl std::fmt::Display for ScopeShortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: requires {}, granted {}",
            self.resource, self.required, self.granted
        )
    }
}

impl PermissionScope {
    /// Read-only on every resource.
    pub fn read_all() -> Self {
        Self::default()
    }

    /// No access to anything.
    pub fn none() -> Self {
        Resource::ALL
            .iter()
            .fold(Self::default(), |scope, r| scope.with(*r, AccessLevel::None))
    }

    /// Set the level for `resource` (builder style).
    pub fn with(mut self, resource: Resource, level: AccessLevel) -> Self {
        self.grants.insert(resource, level);
        self
    }

    pub fn level(&self, resource: Resource) -> AccessLevel {
        self.grants
            .get(&resource)
            .copied()
            .unwrap_or(AccessLevel::Read)
    }

    pub fn allows(&self, resource: Resource, level: AccessLevel) -> bool {
        self.level(resource) >= level
    }

    /// Explicit entries, in resource order.
    pub fn grants(&self) -> impl Iterator<Item = (Resource, AccessLevel)> + '_ {
        self.grants.iter().map(|(r, l)| (*r, *l))
    }

    /// Every explicit entry of `required` this scope does not cover.
    pub fn shortfall(&self, required: &PermissionScope) -> Vec<ScopeShortfall> {
        required
            .grants()
            .filter(|(resource, level)| !self.allows(*resource, *level))
            .map(|(resource, level)| ScopeShortfall {
                resource,
                required: level,
                granted: self.level(resource),
            })
            .collect()
    }

    pub fn covers(&self, required: &PermissionScope) -> bool {
        self.shortfall(required).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_read_only() {
        let scope = PermissionScope::default();
        for r in Resource::ALL {
            assert_eq!(scope.level(r), AccessLevel::Read);
            assert!(!scope.allows(r, AccessLevel::Write));
        }
    }

    #[test]
    fn test_none_denies_reads() {
        let scope = PermissionScope::none();
        assert!(!scope.allows(Resource::Contents, AccessLevel::Read));
        assert!(scope.allows(Resource::Contents, AccessLevel::None));
    }

    #[test]
    fn test_write_implies_read() {
        let scope = PermissionScope::read_all().with(Resource::Contents, AccessLevel::Write);
        assert!(scope.allows(Resource::Contents, AccessLevel::Read));
        assert!(scope.allows(Resource::Contents, AccessLevel::Write));
    }

    #[test]
    fn test_shortfall_reports_only_missing_grants() {
        let scope = PermissionScope::read_all()
            .with(Resource::Contents, AccessLevel::Write)
            .with(Resource::Issues, AccessLevel::None);
        let required = PermissionScope::default()
            .with(Resource::Contents, AccessLevel::Write)
            .with(Resource::PullRequests, AccessLevel::Write)
            .with(Resource::Issues, AccessLevel::Read);

        let missing = scope.shortfall(&required);
        assert_eq!(
            missing,
            vec![
                ScopeShortfall {
                    resource: Resource::Issues,
                    required: AccessLevel::Read,
                    granted: AccessLevel::None,
                },
                ScopeShortfall {
                    resource: Resource::PullRequests,
                    required: AccessLevel::Write,
                    granted: AccessLevel::Read,
                },
            ]
        );
        assert!(!scope.covers(&required));
    }

    #[test]
    fn test_empty_requirement_always_covered() {
        assert!(PermissionScope::none().covers(&PermissionScope::default()));
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let scope: PermissionScope =
            serde_yaml::from_str("contents: write\npull_requests: write\nissues: none\n").unwrap();
        assert_eq!(scope.level(Resource::Contents), AccessLevel::Write);
        assert_eq!(scope.level(Resource::PullRequests), AccessLevel::Write);
        assert_eq!(scope.level(Resource::Issues), AccessLevel::None);
        assert_eq!(scope.level(Resource::Checks), AccessLevel::Read);
    }
}
