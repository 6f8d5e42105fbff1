use std::path::PathBuf;

use url::Url;

use crate::error::Error;

/// Storage keys used for persisted session values.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct StorageKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub user: String,
    pub avatar: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            access_token: "accessToken".into(),
            refresh_token: "refreshToken".into(),
            user: "user".into(),
            avatar: "userAvatar".into(),
        }
    }
}

/// Session configuration.
///
/// The backend base URL is the only required value. Everything else has a
/// default and can be overridden with the `with_*` methods.
///
/// ```rust,ignore
/// use catchup_session::SessionConfig;
///
/// let config = SessionConfig::new("https://catchup.example.com/api/".parse()?)
///     .with_default_role("Mentee");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    pub(crate) api_base: Url,
    pub(crate) role_path: String,
    pub(crate) download_path: String,
    pub(crate) default_role: String,
    pub(crate) cookie_path: String,
    pub(crate) secure_cookies: bool,
    pub(crate) keys: StorageKeys,
    pub(crate) storage_dir: Option<PathBuf>,
}

impl SessionConfig {
    #[must_use]
    pub fn new(api_base: Url) -> Self {
        Self {
            api_base,
            role_path: "User/GetRole".into(),
            download_path: "File/DownloadFile".into(),
            default_role: "User".into(),
            cookie_path: "/".into(),
            secure_cookies: true,
            keys: StorageKeys::default(),
            storage_dir: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `CATCHUP_API_URL`: backend base URL
    ///
    /// # Optional env vars
    /// - `CATCHUP_DEFAULT_ROLE`: role used when the backend reports none
    /// - `CATCHUP_INSECURE_COOKIES`: `"1"` or `"true"` drops the secure flag
    /// - `CATCHUP_STORAGE_DIR`: directory for file-backed session storage
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `CATCHUP_API_URL` is missing or invalid.
    pub fn from_env() -> Result<Self, Error> {
        let api_url = std::env::var("CATCHUP_API_URL")
            .map_err(|_| Error::Config("CATCHUP_API_URL is required".into()))?;
        let api_base: Url = api_url
            .parse()
            .map_err(|e| Error::Config(format!("CATCHUP_API_URL: {e}")))?;

        let mut config = Self::new(api_base);

        if let Ok(role) = std::env::var("CATCHUP_DEFAULT_ROLE") {
            config = config.with_default_role(role);
        }

        let insecure = matches!(
            std::env::var("CATCHUP_INSECURE_COOKIES").as_deref(),
            Ok("1") | Ok("true"),
        );
        config = config.with_secure_cookies(!insecure);

        if let Ok(dir) = std::env::var("CATCHUP_STORAGE_DIR") {
            config = config.with_storage_dir(dir);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_role_path(mut self, path: impl Into<String>) -> Self {
        self.role_path = path.into();
        self
    }

    #[must_use]
    pub fn with_download_path(mut self, path: impl Into<String>) -> Self {
        self.download_path = path.into();
        self
    }

    /// Role reported when the backend answers without one (default `"User"`).
    #[must_use]
    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = role.into();
        self
    }

    #[must_use]
    pub fn with_cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = path.into();
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_storage_keys(mut self, keys: StorageKeys) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    #[must_use]
    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    #[must_use]
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    #[must_use]
    pub fn storage_dir(&self) -> Option<&PathBuf> {
        self.storage_dir.as_ref()
    }

    /// `{api_base}/{role_path}/{user_id}`
    #[cfg_attr(not(feature = "http"), allow(dead_code))]
    pub(crate) fn role_url(&self, user_id: &str) -> Result<Url, Error> {
        self.endpoint(&self.role_path, user_id)
    }

    /// `{api_base}/{download_path}/{file_id}`
    #[cfg_attr(not(feature = "http"), allow(dead_code))]
    pub(crate) fn download_url(&self, file_id: &str) -> Result<Url, Error> {
        self.endpoint(&self.download_path, file_id)
    }

    fn endpoint(&self, path: &str, id: &str) -> Result<Url, Error> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| Error::Config(format!("{} cannot be a base URL", self.api_base)))?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            segments.push(id);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SessionConfig {
        SessionConfig::new("https://catchup.example.com/api/".parse().unwrap())
    }

    #[test]
    fn defaults() {
        let config = test_config();
        assert_eq!(config.default_role(), "User");
        assert_eq!(config.cookie_path, "/");
        assert!(config.secure_cookies);
        assert_eq!(config.keys().avatar, "userAvatar");
        assert!(config.storage_dir().is_none());
    }

    #[test]
    fn role_url_appends_user_id() {
        let url = test_config().role_url("u1").unwrap();
        assert_eq!(url.as_str(), "https://catchup.example.com/api/User/GetRole/u1");
    }

    #[test]
    fn role_url_without_trailing_slash() {
        let config = SessionConfig::new("https://catchup.example.com/api".parse().unwrap());
        let url = config.role_url("u1").unwrap();
        assert_eq!(url.as_str(), "https://catchup.example.com/api/User/GetRole/u1");
    }

    #[test]
    fn ids_are_percent_encoded() {
        let url = test_config().role_url("a b/c").unwrap();
        assert_eq!(url.as_str(), "https://catchup.example.com/api/User/GetRole/a%20b%2Fc");
    }

    #[test]
    fn download_url_with_custom_path() {
        let url = test_config()
            .with_download_path("/Files/Get/")
            .download_url("42")
            .unwrap();
        assert_eq!(url.as_str(), "https://catchup.example.com/api/Files/Get/42");
    }

    #[test]
    fn overrides() {
        let config = test_config()
            .with_default_role("Mentee")
            .with_secure_cookies(false)
            .with_storage_dir("/tmp/catchup");
        assert_eq!(config.default_role(), "Mentee");
        assert!(!config.secure_cookies);
        assert_eq!(config.storage_dir(), Some(&PathBuf::from("/tmp/catchup")));
    }
}
