// Authorization: read for everyone allowed in, write for superusers only.
//
//   allowed = (authenticated OR (anonymous_read AND safe)) AND (safe OR superuser)

use crate::entities::Principal;
use crate::error::{Error, Result};

/// Methods that never modify state
pub const SAFE_METHODS: [&str; 3] = ["GET", "HEAD", "OPTIONS"];

/// Knobs of the permission rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Let unauthenticated clients use safe methods
    pub anonymous_read: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            anonymous_read: true,
        }
    }
}

pub fn is_read_only(method: &str) -> bool {
    SAFE_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

pub fn is_admin(principal: &Principal) -> bool {
    principal.is_superuser()
}

pub fn has_permission(method: &str, principal: &Principal, policy: Policy) -> bool {
    let read_only = is_read_only(method);
    let admitted = principal.is_authenticated() || (policy.anonymous_read && read_only);
    admitted && (read_only || is_admin(principal))
}

/// Same rule as [`has_permission`], as the error the API should answer with
pub fn check(method: &str, principal: &Principal, policy: Policy) -> Result<()> {
    if has_permission(method, principal, policy) {
        Ok(())
    } else if principal.is_authenticated() {
        Err(Error::PermissionDenied)
    } else {
        Err(Error::NotAuthenticated)
    }
}

/// Back-office screens are for superusers whatever the method
pub fn check_admin(principal: &Principal) -> Result<()> {
    match principal {
        Principal::Anonymous => Err(Error::NotAuthenticated),
        p if is_admin(p) => Ok(()),
        _ => Err(Error::PermissionDenied),
    }
}
