// access.rs
// Access control guard. Handlers call `authorize` first thing and inspect the
// result before touching any state.

use mongodb::bson::oid::ObjectId;

use crate::{
    error::InventoryError,
    models::{Role, User},
};

/// Roles allowed to run administrative operations.
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
/// Every signed-in member.
pub const MEMBERS: &[Role] = &[Role::Admin, Role::User];

/// Authenticated actor of a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: ObjectId,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn from_user(user: &User) -> Option<Self> {
        Some(Principal {
            id: user.id?,
            email: user.email.clone(),
            name: user.first_name.clone(),
            role: user.role,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Admits the principal when it is authenticated and its role is in `allowed`.
pub fn authorize<'a>(
    principal: Option<&'a Principal>,
    allowed: &[Role],
) -> Result<&'a Principal, InventoryError> {
    let principal = principal.ok_or(InventoryError::Forbidden)?;
    if allowed.contains(&principal.role) {
        Ok(principal)
    } else {
        Err(InventoryError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            id: ObjectId::new(),
            email: "someone@example.com".into(),
            name: "Someone".into(),
            role,
        }
    }

    #[test]
    fn anonymous_is_always_forbidden() {
        for allowed in [ADMIN_ONLY, MEMBERS, &[][..]] {
            assert!(matches!(
                authorize(None, allowed),
                Err(InventoryError::Forbidden)
            ));
        }
    }

    #[test]
    fn admin_passes_admin_only() {
        let admin = principal(Role::Admin);
        assert!(authorize(Some(&admin), ADMIN_ONLY).is_ok());
        assert!(authorize(Some(&admin), MEMBERS).is_ok());
    }

    #[test]
    fn member_is_limited_to_member_screens() {
        let member = principal(Role::User);
        assert!(matches!(
            authorize(Some(&member), ADMIN_ONLY),
            Err(InventoryError::Forbidden)
        ));
        assert!(authorize(Some(&member), MEMBERS).is_ok());
    }

    #[test]
    fn legacy_admin_flag_grants_admin() {
        let user = User {
            id: Some(ObjectId::new()),
            email: "legacy@example.com".into(),
            first_name: "Legacy".into(),
            password: String::new(),
            role: Role::resolve(None, Some(true)),
        };
        let principal = Principal::from_user(&user).unwrap();
        assert!(authorize(Some(&principal), ADMIN_ONLY).is_ok());
    }
}
