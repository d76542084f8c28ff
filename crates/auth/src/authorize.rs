use std::collections::HashMap;

use crate::{Permission, Role};

/// Answers "may this role perform `action` on `resource`?".
///
/// Implementations must be pure lookups; the engine calls this inside an open
/// store transaction.
pub trait PermissionService: Send + Sync {
    fn authorize(&self, role: &Role, resource: &str, action: &str) -> bool;
}

/// Role-to-permission table held in memory.
///
/// Admin is always granted regardless of the table contents.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    grants: HashMap<Role, Vec<Permission>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, role: Role, permissions: impl IntoIterator<Item = &'static str>) -> Self {
        self.grants
            .entry(role)
            .or_default()
            .extend(permissions.into_iter().map(Permission::new));
        self
    }

    pub fn permissions_for(&self, role: &Role) -> &[Permission] {
        self.grants.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Default grants for the warehouse deployment.
    ///
    /// Resource names match `DocumentType::resource()` plus `inventory_lot` and
    /// `approval_tier`.
    pub fn warehouse_defaults() -> Self {
        Self::new()
            .grant(Role::ADMIN, ["*"])
            .grant(Role::SYSTEM, ["*"])
            .grant(
                Role::WAREHOUSE_STAFF,
                [
                    "goods_receipt.*",
                    "material_issue.*",
                    "material_return.*",
                    "internal_transfer.*",
                    "discrepancy_report.*",
                    "inventory_lot.read",
                ],
            )
            .grant(
                Role::WAREHOUSE_SUPERVISOR,
                [
                    "goods_receipt.*",
                    "material_issue.*",
                    "material_return.*",
                    "internal_transfer.*",
                    "discrepancy_report.*",
                    "quality_inspection.*",
                    "inventory_lot.*",
                ],
            )
            .grant(Role::WAREHOUSE_MANAGER, ["*"])
            .grant(
                Role::QC_INSPECTOR,
                [
                    "goods_receipt.*",
                    "material_return.*",
                    "quality_inspection.*",
                    "discrepancy_report.*",
                    "inventory_lot.read",
                ],
            )
            .grant(
                Role::SITE_ENGINEER,
                ["material_issue.*", "material_return.*", "inventory_lot.read"],
            )
            .grant(
                Role::PROJECT_MANAGER,
                [
                    "material_issue.*",
                    "material_return.*",
                    "internal_transfer.*",
                    "discrepancy_report.*",
                    "inventory_lot.read",
                ],
            )
            .grant(
                Role::FINANCE_MANAGER,
                [
                    "goods_receipt.read",
                    "material_issue.*",
                    "internal_transfer.*",
                    "discrepancy_report.*",
                    "approval_tier.*",
                    "inventory_lot.read",
                ],
            )
            .grant(Role::DIRECTOR, ["*"])
    }
}

impl PermissionService for StaticPermissions {
    fn authorize(&self, role: &Role, resource: &str, action: &str) -> bool {
        if role.is_admin() {
            return true;
        }
        let granted = self
            .permissions_for(role)
            .iter()
            .any(|p| p.grants(resource, action));
        if !granted {
            tracing::debug!(role = %role, resource, action, "permission denied");
        }
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_is_always_authorized() {
        let perms = StaticPermissions::new();
        assert!(perms.authorize(&Role::ADMIN, "goods_receipt", "approve"));
    }

    #[test]
    fn unknown_role_is_denied() {
        let perms = StaticPermissions::warehouse_defaults();
        assert!(!perms.authorize(&Role::new("visitor"), "goods_receipt", "read"));
    }

    #[test]
    fn defaults_scope_roles_to_their_resources() {
        let perms = StaticPermissions::warehouse_defaults();
        assert!(perms.authorize(&Role::QC_INSPECTOR, "quality_inspection", "complete"));
        assert!(!perms.authorize(&Role::SITE_ENGINEER, "quality_inspection", "complete"));
        assert!(perms.authorize(&Role::FINANCE_MANAGER, "material_issue", "approve"));
        assert!(!perms.authorize(&Role::FINANCE_MANAGER, "goods_receipt", "receive"));
        assert!(perms.authorize(&Role::DIRECTOR, "inventory_lot", "block"));
    }
}
