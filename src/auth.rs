//! Who is calling, and what they may do.
use tracing::debug;

use crate::identity::{IdentityProvider, Role, User};
use crate::{Result, SwapError};

/// Decides who is an administrator.
///
/// A user is an administrator when their role says so, or when their email is the designated
/// superuser address.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    superuser_email: Option<String>,
}

impl AdminPolicy {
    /// a policy with an optional designated superuser address
    pub fn new(superuser_email: Option<String>) -> Self {
        AdminPolicy {
            superuser_email: superuser_email.filter(|email| !email.trim().is_empty()),
        }
    }

    /// the account carries the admin role
    pub fn role_is_admin(&self, user: &User) -> bool {
        user.role == Role::Admin
    }

    /// the account's email is the designated superuser address
    pub fn is_designated_superuser(&self, user: &User) -> bool {
        self.superuser_email
            .as_deref()
            .map_or(false, |email| email.trim().eq_ignore_ascii_case(user.email.trim()))
    }

    /// `role_is_admin || is_designated_superuser`
    pub fn is_admin(&self, user: &User) -> bool {
        self.role_is_admin(user) || self.is_designated_superuser(user)
    }
}

/// The identity an operation runs on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// nobody is signed in
    Anonymous,
    /// a signed in member
    User(String),
    /// a signed in administrator
    Admin(String),
}

impl Caller {
    /// the caller's user id, if signed in
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Caller::Anonymous => None,
            Caller::User(id) | Caller::Admin(id) => Some(id),
        }
    }

    /// true for administrators
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin(_))
    }

    /// the caller's id
    ///
    /// # Errors
    /// `SwapError::Unauthenticated` for anonymous callers
    pub fn require_user(&self) -> Result<&str> {
        self.user_id().ok_or(SwapError::Unauthenticated)
    }

    /// the caller's id, when the caller is an administrator
    ///
    /// # Errors
    /// `SwapError::Unauthenticated` for anonymous callers, `SwapError::Forbidden` for members
    pub fn require_admin(&self) -> Result<&str> {
        match self {
            Caller::Anonymous => Err(SwapError::Unauthenticated),
            Caller::User(_) => Err(SwapError::Forbidden(
                "administrator access required".to_string(),
            )),
            Caller::Admin(id) => Ok(id),
        }
    }
}

/// Turns a raw caller id into a [`Caller`], using an identity provider and an [`AdminPolicy`].
#[derive(Debug, Clone)]
pub struct Gatekeeper<I: IdentityProvider> {
    identity: I,
    policy: AdminPolicy,
}

impl<I: IdentityProvider> Gatekeeper<I> {
    /// a gatekeeper over `identity`
    pub fn new(identity: I, policy: AdminPolicy) -> Self {
        Gatekeeper { identity, policy }
    }

    /// the identity provider in use
    pub fn identity(&self) -> &I {
        &self.identity
    }

    /// the admin policy in use
    pub fn policy(&self) -> &AdminPolicy {
        &self.policy
    }

    /// Resolves `user_id` into a caller.
    ///
    /// # Errors
    /// `SwapError::Unauthenticated` if the id is unknown to the provider,
    /// `SwapError::Forbidden` if the account is suspended.
    pub fn resolve(&self, user_id: Option<&str>) -> Result<Caller> {
        let user_id = match user_id.map(str::trim) {
            None | Some("") => return Ok(Caller::Anonymous),
            Some(id) => id,
        };
        let user = self
            .identity
            .get_user(user_id)?
            .ok_or(SwapError::Unauthenticated)?;
        if user.suspended {
            return Err(SwapError::Forbidden(format!("account {} is suspended", user.id)));
        }
        let admin = self.policy.is_admin(&user);
        debug!(user_id, admin, "resolved caller");
        Ok(if admin {
            Caller::Admin(user.id)
        } else {
            Caller::User(user.id)
        })
    }
}
