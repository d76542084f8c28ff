use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are opaque strings; the well-known ones are provided as constants.
/// Mapping roles to permissions is the job of a [`crate::PermissionService`],
/// mapping them to approval authority is the job of [`RoleHierarchy`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const SYSTEM: Role = Role(Cow::Borrowed("system"));
    pub const WAREHOUSE_STAFF: Role = Role(Cow::Borrowed("warehouse_staff"));
    pub const WAREHOUSE_SUPERVISOR: Role = Role(Cow::Borrowed("warehouse_supervisor"));
    pub const WAREHOUSE_MANAGER: Role = Role(Cow::Borrowed("warehouse_manager"));
    pub const QC_INSPECTOR: Role = Role(Cow::Borrowed("qc_inspector"));
    pub const SITE_ENGINEER: Role = Role(Cow::Borrowed("site_engineer"));
    pub const PROJECT_MANAGER: Role = Role(Cow::Borrowed("project_manager"));
    pub const FINANCE_MANAGER: Role = Role(Cow::Borrowed("finance_manager"));
    pub const DIRECTOR: Role = Role(Cow::Borrowed("director"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Admin bypasses every role list and scope rule.
    pub fn is_admin(&self) -> bool {
        self.as_str() == "admin"
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered ranking of roles for approval authority.
///
/// An actor satisfies an approval requirement when their rank is at least the
/// rank of the required role. Roles missing from the table have no authority,
/// with the exception of admin which satisfies everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleHierarchy {
    ranks: HashMap<Role, u32>,
}

impl RoleHierarchy {
    pub fn new(ranks: impl IntoIterator<Item = (Role, u32)>) -> Self {
        Self {
            ranks: ranks.into_iter().collect(),
        }
    }

    pub fn rank(&self, role: &Role) -> Option<u32> {
        self.ranks.get(role).copied()
    }

    pub fn satisfies(&self, actor_role: &Role, required: &Role) -> bool {
        if actor_role.is_admin() || actor_role == required {
            return true;
        }
        match (self.rank(actor_role), self.rank(required)) {
            (Some(have), Some(need)) => have >= need,
            _ => false,
        }
    }
}

impl Default for RoleHierarchy {
    fn default() -> Self {
        Self::new([
            (Role::WAREHOUSE_STAFF, 10),
            (Role::QC_INSPECTOR, 10),
            (Role::SITE_ENGINEER, 10),
            (Role::WAREHOUSE_SUPERVISOR, 20),
            (Role::WAREHOUSE_MANAGER, 30),
            (Role::PROJECT_MANAGER, 30),
            (Role::FINANCE_MANAGER, 40),
            (Role::DIRECTOR, 50),
            (Role::ADMIN, 100),
        ])
    }
}
