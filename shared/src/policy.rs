//! Who may do what to which resource.

use crate::error::ApiError;
use crate::types::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Submission,
    Field,
    User,
    Image,
}

/// Relationship between the caller and a resource that grants an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    /// The resource is the caller's own user record
    SelfOnly,
    /// The caller owns the resource
    Owner,
    Admin,
}

fn grants(resource: Resource, action: Action) -> &'static [Grant] {
    use Grant::*;
    match (resource, action) {
        (Resource::User, Action::Delete) => &[Admin],
        (Resource::User, _) => &[SelfOnly, Admin],
        (Resource::Submission | Resource::Field | Resource::Image, _) => &[Owner, Admin],
    }
}

/// Check `principal` may perform `action` on a resource owned by `owner_id`.
/// For user records the owner is the user itself.
pub fn authorize(
    principal: &User,
    resource: Resource,
    action: Action,
    owner_id: &str,
) -> Result<(), ApiError> {
    let allowed = grants(resource, action).iter().any(|grant| match grant {
        Grant::Admin => principal.is_admin(),
        Grant::SelfOnly | Grant::Owner => principal.id == owner_id,
    });

    if allowed {
        Ok(())
    } else {
        tracing::warn!(
            "Denied {:?} on {:?} owned by {} to user {}",
            action,
            resource,
            owner_id,
            principal.id
        );
        Err(ApiError::access_denied())
    }
}

pub fn require_admin(principal: &User) -> Result<(), ApiError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Admin access required".to_string()))
    }
}

/// Owner restriction for a list query. Admins see everything unless they ask
/// for a specific owner; everyone else sees only their own records and may
/// not ask for anyone else's.
pub fn list_scope(
    principal: &User,
    requested_owner: Option<&str>,
) -> Result<Option<String>, ApiError> {
    match requested_owner.filter(|o| !o.is_empty()) {
        Some(owner) if principal.is_admin() || owner == principal.id => {
            Ok(Some(owner.to_string()))
        }
        Some(_) => Err(ApiError::access_denied()),
        None if principal.is_admin() => Ok(None),
        None => Ok(Some(principal.id.clone())),
    }
}
