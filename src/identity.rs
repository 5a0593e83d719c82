//! Authenticated user lookup.

/// The user a dispatcher publishes on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Stable user id, used as a recipient id.
    pub id: String,
    /// Display name.
    pub full_name: String,
}

impl User {
    pub fn new(id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
        }
    }
}

/// Source of the currently authenticated user.
pub trait IdentityProvider: Send + Sync {
    /// `None` when no user is authenticated.
    fn authenticated_user(&self) -> Option<User>;
}

/// Fixed user, typically from configuration.
#[derive(Debug, Clone)]
pub struct StaticIdentity(User);

impl StaticIdentity {
    pub fn new(user: User) -> Self {
        Self(user)
    }
}

impl IdentityProvider for StaticIdentity {
    fn authenticated_user(&self) -> Option<User> {
        Some(self.0.clone())
    }
}

/// No authenticated user.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentity;

impl IdentityProvider for AnonymousIdentity {
    fn authenticated_user(&self) -> Option<User> {
        None
    }
}
