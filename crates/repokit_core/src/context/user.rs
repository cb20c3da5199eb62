//! Identity of the caller performing a checkpoint.

/// Identity stamped when no user is available.
pub const SYSTEM_USER: &str = "System";

pub trait CurrentUserProvider: Send + Sync {
    /// Returns the current user id, or `None` when nobody is signed in.
    fn current_user_id(&self) -> Option<String>;
}

/// Provider with no signed-in user.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousUser;

impl CurrentUserProvider for AnonymousUser {
    fn current_user_id(&self) -> Option<String> {
        None
    }
}

/// Provider that always reports the same user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedUser(pub String);

impl FixedUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(user_id.into())
    }
}

impl CurrentUserProvider for FixedUser {
    fn current_user_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Resolves the stamped identity; blank ids fall back to `fallback`.
pub(crate) fn resolve_user(provider: &dyn CurrentUserProvider, fallback: &str) -> String {
    provider
        .current_user_id()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::{resolve_user, AnonymousUser, FixedUser, SYSTEM_USER};

    #[test]
    fn missing_or_blank_user_falls_back() {
        assert_eq!(resolve_user(&AnonymousUser, SYSTEM_USER), "System");
        assert_eq!(resolve_user(&FixedUser::new("  "), SYSTEM_USER), "System");
        assert_eq!(resolve_user(&FixedUser::new("ada"), SYSTEM_USER), "ada");
    }
}
