//! `wareflow-auth`: who is acting, and what they may do.
//!
//! Pure authorization boundary: no HTTP, no storage. The API layer turns a
//! bearer token into an [`Actor`]; the engine asks a [`PermissionService`]
//! and a [`RoleHierarchy`] whether that actor may proceed.

pub mod actor;
pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod roles;

pub use actor::Actor;
pub use authorize::{PermissionService, StaticPermissions};
pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use permissions::Permission;
pub use roles::{Role, RoleHierarchy};
