use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wareflow_core::{ProjectId, UserId, WarehouseId};

use crate::Role;

/// The authenticated party performing an operation.
///
/// `scope_warehouse_id` / `scope_project_id` restrict which documents the actor
/// may touch when a workflow declares a scope rule. `None` means unscoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    pub scope_warehouse_id: Option<WarehouseId>,
    pub scope_project_id: Option<ProjectId>,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            role,
            scope_warehouse_id: None,
            scope_project_id: None,
        }
    }

    pub fn with_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.scope_warehouse_id = Some(warehouse_id);
        self
    }

    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.scope_project_id = Some(project_id);
        self
    }

    /// Identity used by event-driven orchestration (e.g. auto-created reports).
    pub fn system() -> Self {
        Self::new(UserId::from_uuid(Uuid::nil()), Role::SYSTEM)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::SYSTEM
    }

    /// Whether this actor may act on a record located at `warehouse_id`.
    pub fn can_access_warehouse(&self, warehouse_id: Option<WarehouseId>) -> bool {
        if self.role.is_admin() || self.is_system() {
            return true;
        }
        match (self.scope_warehouse_id, warehouse_id) {
            (None, _) => true,
            (Some(scope), Some(target)) => scope == target,
            (Some(_), None) => false,
        }
    }

    /// Whether this actor may act on a record attached to `project_id`.
    pub fn can_access_project(&self, project_id: Option<ProjectId>) -> bool {
        if self.role.is_admin() || self.is_system() {
            return true;
        }
        match (self.scope_project_id, project_id) {
            (None, _) => true,
            (Some(scope), Some(target)) => scope == target,
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_actor_is_limited_to_its_warehouse() {
        let wh = WarehouseId::new();
        let actor = Actor::new(UserId::new(), Role::WAREHOUSE_STAFF).with_warehouse(wh);
        assert!(actor.can_access_warehouse(Some(wh)));
        assert!(!actor.can_access_warehouse(Some(WarehouseId::new())));
        assert!(!actor.can_access_warehouse(None));
    }

    #[test]
    fn unscoped_and_admin_actors_pass() {
        let free = Actor::new(UserId::new(), Role::DIRECTOR);
        assert!(free.can_access_project(Some(ProjectId::new())));

        let admin = Actor::new(UserId::new(), Role::ADMIN).with_project(ProjectId::new());
        assert!(admin.can_access_project(Some(ProjectId::new())));
    }

    #[test]
    fn system_actor_is_recognised() {
        let sys = Actor::system();
        assert!(sys.is_system());
        assert_eq!(sys.id.as_uuid(), &Uuid::nil());
    }
}
