use std::future::Future;

use crate::error::Error;
use crate::types::{AvatarId, UserId};

/// Backend role lookup (`GET /User/GetRole/{userId}`).
///
/// Returns `Ok(None)` when the backend answers without a role.
pub trait RoleSource: Send + Sync + 'static {
    fn fetch_role(
        &self,
        user_id: &UserId,
        access_token: Option<&str>,
    ) -> impl Future<Output = Result<Option<String>, Error>> + Send;
}

/// Backend file download.
pub trait FileSource: Send + Sync + 'static {
    fn download_file(
        &self,
        file_id: AvatarId,
        access_token: Option<&str>,
    ) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
}

/// Owner of the cached task list, told to discard it on logout.
pub trait TaskCache: Send + Sync + 'static {
    fn clear_all(&self);
}

#[cfg(feature = "http")]
pub use self::http::BackendClient;

#[cfg(feature = "http")]
mod http {
    use super::{FileSource, RoleSource};
    use crate::config::SessionConfig;
    use crate::error::Error;
    use crate::types::{AvatarId, UserId};

    /// `reqwest` client for the catchUp backend endpoints the session needs.
    #[derive(Debug, Clone)]
    pub struct BackendClient {
        config: SessionConfig,
        http: reqwest::Client,
    }

    impl BackendClient {
        #[must_use]
        pub fn new(config: SessionConfig) -> Self {
            Self {
                config,
                http: reqwest::Client::new(),
            }
        }

        /// Use a custom HTTP client (for timeouts, connection pool reuse or testing).
        #[must_use]
        pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
            self.http = client;
            self
        }

        fn get(&self, url: url::Url, access_token: Option<&str>) -> reqwest::RequestBuilder {
            let request = self.http.get(url);
            match access_token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        }

        /// Checks HTTP response status; returns the response on success or an error with details.
        async fn ensure_success(
            response: reqwest::Response,
            operation: &'static str,
        ) -> Result<reqwest::Response, Error> {
            if response.status().is_success() {
                return Ok(response);
            }
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(Error::Backend {
                operation,
                status: Some(status),
                detail: body,
            })
        }
    }

    impl RoleSource for BackendClient {
        async fn fetch_role(
            &self,
            user_id: &UserId,
            access_token: Option<&str>,
        ) -> Result<Option<String>, Error> {
            let url = self.config.role_url(user_id.as_str())?;
            let response = self.get(url, access_token).send().await?;
            let response = Self::ensure_success(response, "role lookup").await?;
            let body = response.text().await?;
            Ok(parse_role(&body))
        }
    }

    impl FileSource for BackendClient {
        async fn download_file(
            &self,
            file_id: AvatarId,
            access_token: Option<&str>,
        ) -> Result<Vec<u8>, Error> {
            let url = self.config.download_url(&file_id.to_string())?;
            let response = self.get(url, access_token).send().await?;
            let response = Self::ensure_success(response, "file download").await?;
            Ok(response.bytes().await?.to_vec())
        }
    }

    /// The role endpoint answers with either a JSON string or plain text.
    pub(super) fn parse_role(body: &str) -> Option<String> {
        let body = body.trim();
        let role = match serde_json::from_str::<Option<String>>(body) {
            Ok(role) => role,
            Err(_) => Some(body.to_string()),
        };
        role.filter(|r| !r.trim().is_empty())
    }
}
