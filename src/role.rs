use crate::backend::RoleSource;
use crate::error::Error;
use crate::types::UserId;

/// Memoization state of the role lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoleState {
    #[default]
    Unresolved,
    Resolved(String),
}

impl RoleState {
    /// Cached role, or `""` while unresolved.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unresolved => "",
            Self::Resolved(role) => role,
        }
    }
}

/// Fetches a user's role once per session and reuses it afterwards.
///
/// There is no expiry: a resolved role is trusted until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct RoleResolver {
    state: RoleState,
    default_role: String,
}

impl RoleResolver {
    #[must_use]
    pub fn new(default_role: impl Into<String>) -> Self {
        Self {
            state: RoleState::Unresolved,
            default_role: default_role.into(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &RoleState {
        &self.state
    }

    #[must_use]
    pub fn cached(&self) -> Option<&str> {
        match &self.state {
            RoleState::Resolved(role) => Some(role),
            RoleState::Unresolved => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = RoleState::Unresolved;
    }

    /// Return the cached role, fetching it from `source` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a blank `user_id` (no request is
    /// made) and [`Error::RoleFetchFailed`] if the lookup fails. Failures are
    /// not cached.
    pub async fn get_role<R: RoleSource>(
        &mut self,
        user_id: &UserId,
        source: &R,
        access_token: Option<&str>,
    ) -> Result<String, Error> {
        validate_user_id(user_id)?;
        if let Some(role) = self.cached() {
            return Ok(role.to_string());
        }
        let role = self.fetch(user_id, source, access_token).await?;
        self.resolve(role.clone());
        Ok(role)
    }

    /// Fetch without touching the cache. The session uses this so no lock is
    /// held across the request.
    pub(crate) async fn fetch<R: RoleSource>(
        &self,
        user_id: &UserId,
        source: &R,
        access_token: Option<&str>,
    ) -> Result<String, Error> {
        let fetched = source.fetch_role(user_id, access_token).await.map_err(|e| {
            tracing::warn!(error = %e, user_id = %user_id, "Role lookup failed");
            Error::RoleFetchFailed(e.to_string())
        })?;
        Ok(fetched
            .filter(|role| !role.trim().is_empty())
            .unwrap_or_else(|| self.default_role.clone()))
    }

    pub(crate) fn resolve(&mut self, role: String) {
        self.state = RoleState::Resolved(role);
    }
}

pub(crate) fn validate_user_id(user_id: &UserId) -> Result<(), Error> {
    if user_id.is_empty() {
        return Err(Error::InvalidArgument("user id is required".into()));
    }
    Ok(())
}
