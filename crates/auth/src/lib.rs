//! `bulkyard-auth`: explicit capability checks for every operation.
//!
//! Identity and role membership are resolved by an external collaborator; this
//! crate only decides whether a given [`Principal`] may do something. Nothing
//! here reads ambient session state.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize, authorize_owner_or};
pub use permissions::Permission;
pub use principal::{Principal, PrincipalId};
pub use roles::{Role, role_permissions};
