//! Client-side session state.
//!
//! A [`Session`] is built once at startup with [`Session::init`], which
//! restores whatever a previous run persisted, and is then shared (by clone)
//! with every consumer. Setters write through to durable storage.
//!
//! ```rust,ignore
//! use catchup_session::{BackendClient, Session, SessionConfig, TokenPair};
//!
//! let session = Session::from_config(SessionConfig::from_env()?)?;
//! if let Some(task) = session.sign_in(TokenPair::new(access, Some(refresh)), user) {
//!     task.wait().await; // optional, the fetch runs either way
//! }
//! let role = session.get_role(&user_id).await?;
//! session.logout();
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::{AbortHandle, JoinHandle};

use crate::avatar::{self, AvatarCache, AvatarOutcome};
use crate::backend::{FileSource, RoleSource, TaskCache};
use crate::config::SessionConfig;
use crate::error::Error;
use crate::role::{RoleResolver, RoleState, validate_user_id};
use crate::storage::{CookieStore, KeyValueStore, session_cookie};
use crate::types::{AvatarId, TokenPair, User, UserId};

/// Handle to an avatar fetch started by [`Session::set_user`].
///
/// Dropping the handle detaches the task; it still runs to completion.
#[derive(Debug)]
pub struct AvatarTask {
    avatar_id: AvatarId,
    handle: JoinHandle<AvatarOutcome>,
}

impl AvatarTask {
    #[must_use]
    pub fn avatar_id(&self) -> AvatarId {
        self.avatar_id
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the fetch. A result that has not been applied yet is discarded.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the fetch and return what happened.
    pub async fn wait(self) -> AvatarOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => AvatarOutcome::Cancelled,
            Err(e) => {
                tracing::error!(error = %e, avatar_id = %self.avatar_id, "Avatar task panicked");
                AvatarOutcome::Failed(Error::AvatarFetchFailed(e.to_string()))
            }
        }
    }
}

struct SessionState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<User>,
    avatar: Option<String>,
    roles: RoleResolver,
    /// Bumped whenever user/avatar ownership changes; stale async results
    /// carrying an older epoch are dropped.
    epoch: u64,
    pending_avatar: Option<AbortHandle>,
    task_cache: Option<Arc<dyn TaskCache>>,
}

impl SessionState {
    fn supersede(&mut self) -> u64 {
        if let Some(pending) = self.pending_avatar.take() {
            pending.abort();
        }
        self.epoch += 1;
        self.epoch
    }
}

struct Inner<R, F> {
    config: SessionConfig,
    cookies: Arc<dyn CookieStore>,
    avatar: AvatarCache,
    role_source: R,
    files: F,
    state: Mutex<SessionState>,
}

/// Shared session/auth state of the signed-in user.
///
/// Cloning is cheap; clones share the same state.
pub struct Session<R, F> {
    inner: Arc<Inner<R, F>>,
}

// Manual Clone: avoid derive adding `R: Clone, F: Clone` bounds.
impl<R, F> Clone for Session<R, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RoleSource, F: FileSource> Session<R, F> {
    /// Build a session, restoring tokens, user and avatar from storage.
    ///
    /// A persisted user record that no longer parses is dropped.
    pub fn init(
        config: SessionConfig,
        cookies: Arc<dyn CookieStore>,
        storage: Arc<dyn KeyValueStore>,
        role_source: R,
        files: F,
    ) -> Self {
        let keys = config.keys().clone();
        let avatar = AvatarCache::new(storage, keys.avatar.clone());

        let user = cookies.get(&keys.user).and_then(|raw| {
            serde_json::from_str::<User>(&raw)
                .inspect_err(|e| tracing::warn!(error = %e, "Discarding unreadable persisted user"))
                .ok()
        });

        let state = SessionState {
            access_token: cookies.get(&keys.access_token),
            refresh_token: cookies.get(&keys.refresh_token),
            user,
            avatar: avatar.load_cached(),
            roles: RoleResolver::new(config.default_role()),
            epoch: 0,
            pending_avatar: None,
            task_cache: None,
        };

        tracing::debug!(
            has_token = state.access_token.is_some(),
            has_user = state.user.is_some(),
            has_avatar = state.avatar.is_some(),
            "Session restored"
        );

        Self {
            inner: Arc::new(Inner {
                config,
                cookies,
                avatar,
                role_source,
                files,
                state: Mutex::new(state),
            }),
        }
    }

    /// Register the owner of the cached task list, cleared on logout.
    pub fn set_task_cache(&self, task_cache: Arc<dyn TaskCache>) {
        self.lock().task_cache = Some(task_cache);
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Readers ───────────────────────────────────────────────────────

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh_token.clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.lock().user.clone()
    }

    /// Encoded avatar (`data:` URL), if cached.
    #[must_use]
    pub fn avatar(&self) -> Option<String> {
        self.lock().avatar.clone()
    }

    /// Cached role, or `""` if not resolved this session.
    #[must_use]
    pub fn cached_role(&self) -> String {
        self.lock().roles.state().as_str().to_string()
    }

    #[must_use]
    pub fn role_state(&self) -> RoleState {
        self.lock().roles.state().clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        let state = self.lock();
        state.access_token.is_some() && state.user.is_some()
    }

    // ── Setters ───────────────────────────────────────────────────────

    pub fn set_access_token(&self, token: Option<String>) {
        let key = self.inner.config.keys().access_token.clone();
        self.persist_cookie(&key, token.as_deref());
        self.lock().access_token = token;
    }

    pub fn set_refresh_token(&self, token: Option<String>) {
        let key = self.inner.config.keys().refresh_token.clone();
        self.persist_cookie(&key, token.as_deref());
        self.lock().refresh_token = token;
    }

    /// Set or clear the signed-in user.
    ///
    /// When the user carries an avatar id, the avatar is fetched in the
    /// background and the returned [`AvatarTask`] tracks it. Clearing the user,
    /// or switching to a different one, also clears the avatar and the cached role.
    pub fn set_user(&self, user: Option<User>) -> Option<AvatarTask> {
        let keys = self.inner.config.keys();
        let Some(user) = user else {
            {
                let mut state = self.lock();
                state.supersede();
                state.user = None;
                state.avatar = None;
                state.roles.reset();
            }
            self.persist_cookie(&keys.user, None);
            self.inner.avatar.clear();
            return None;
        };

        match serde_json::to_string(&user) {
            Ok(json) => self.persist_cookie(&keys.user, Some(&json)),
            Err(e) => tracing::warn!(error = %e, user_id = %user.id, "Failed to serialize user"),
        }

        let avatar_id = user.avatar_id;
        let mut state = self.lock();
        let epoch = state.supersede();
        if !state.user.as_ref().is_some_and(|current| current.id == user.id) {
            state.roles.reset();
            if state.avatar.take().is_some() {
                self.inner.avatar.clear();
            }
        }
        tracing::debug!(user_id = %user.id, "Session user set");
        state.user = Some(user);

        let task = self.spawn_avatar_fetch(avatar_id?, epoch, state.access_token.clone())?;
        state.pending_avatar = Some(task.handle.abort_handle());
        Some(task)
    }

    /// Encode and cache a new avatar image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncodingFailed`] if `bytes` is not a readable image.
    pub fn update_avatar(&self, bytes: &[u8]) -> Result<String, Error> {
        let encoded = avatar::encode_data_url(bytes)?;
        let mut state = self.lock();
        state.supersede();
        if let Err(e) = self.inner.avatar.store_encoded(&encoded) {
            tracing::warn!(error = %e, "Failed to persist avatar");
        }
        state.avatar = Some(encoded.clone());
        Ok(encoded)
    }

    /// Sign in: store both tokens and the user in one step.
    pub fn sign_in(&self, tokens: TokenPair, user: User) -> Option<AvatarTask> {
        self.set_access_token(Some(tokens.access_token));
        self.set_refresh_token(tokens.refresh_token);
        tracing::info!(user_id = %user.id, "Signed in");
        self.set_user(Some(user))
    }

    /// Clear every piece of session state, persisted and in memory.
    ///
    /// A pending avatar fetch is aborted and the task cache owner is told to
    /// drop its cached tasks.
    pub fn logout(&self) {
        let task_cache = {
            let mut state = self.lock();
            state.supersede();
            state.access_token = None;
            state.refresh_token = None;
            state.user = None;
            state.avatar = None;
            state.roles.reset();
            state.task_cache.clone()
        };

        let keys = self.inner.config.keys();
        self.persist_cookie(&keys.access_token, None);
        self.persist_cookie(&keys.refresh_token, None);
        self.persist_cookie(&keys.user, None);
        self.inner.avatar.clear();

        if let Some(task_cache) = task_cache {
            task_cache.clear_all();
        }
        tracing::info!("Logged out");
    }

    /// Role of `user_id`, fetched once per session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a blank id (no request is made)
    /// and [`Error::RoleFetchFailed`] if the lookup fails. Failures are not cached.
    pub async fn get_role(&self, user_id: &UserId) -> Result<String, Error> {
        validate_user_id(user_id)?;
        let (resolver, access_token, epoch) = {
            let state = self.lock();
            if let Some(role) = state.roles.cached() {
                return Ok(role.to_string());
            }
            (state.roles.clone(), state.access_token.clone(), state.epoch)
        };

        let role = resolver
            .fetch(user_id, &self.inner.role_source, access_token.as_deref())
            .await?;

        let mut state = self.lock();
        if state.epoch == epoch {
            state.roles.resolve(role.clone());
        }
        Ok(role)
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Best-effort cookie write; `None` removes the cookie.
    fn persist_cookie(&self, name: &str, value: Option<&str>) {
        let config = &self.inner.config;
        let result = match value {
            Some(value) => self.inner.cookies.add(session_cookie(
                name,
                value,
                &config.cookie_path,
                config.secure_cookies,
            )),
            None => self.inner.cookies.remove(name, &config.cookie_path),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, cookie = name, "Failed to persist session cookie");
        }
    }

    fn spawn_avatar_fetch(
        &self,
        avatar_id: AvatarId,
        epoch: u64,
        access_token: Option<String>,
    ) -> Option<AvatarTask> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(error = %e, avatar_id = %avatar_id, "No async runtime, avatar not fetched");
                return None;
            }
        };

        let inner = Arc::clone(&self.inner);
        let handle = runtime.spawn(async move {
            let downloaded = avatar::download(avatar_id, &inner.files, access_token.as_deref()).await;

            let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.epoch != epoch {
                tracing::debug!(avatar_id = %avatar_id, "Dropping superseded avatar fetch");
                return AvatarOutcome::Cancelled;
            }
            state.pending_avatar = None;
            let outcome = match downloaded {
                Ok(bytes) => inner.avatar.store_download(avatar_id, &bytes),
                Err(e) => AvatarOutcome::Failed(e),
            };
            if let Some(encoded) = outcome.encoded() {
                state.avatar = Some(encoded.to_string());
            }
            outcome
        });

        Some(AvatarTask { avatar_id, handle })
    }
}

#[cfg(feature = "http")]
impl Session<crate::backend::BackendClient, crate::backend::BackendClient> {
    /// Session over the HTTP backend, with file storage when
    /// `storage_dir` is configured and in-memory storage otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] or [`Error::Serialization`] if the
    /// persisted files exist but cannot be read.
    pub fn from_config(config: SessionConfig) -> Result<Self, Error> {
        use crate::storage::{
            FileCookieStore, FileKeyValueStore, MemoryCookieStore, MemoryKeyValueStore,
        };

        let (cookies, storage): (Arc<dyn CookieStore>, Arc<dyn KeyValueStore>) =
            match config.storage_dir() {
                Some(dir) => (
                    Arc::new(FileCookieStore::in_dir(dir)?),
                    Arc::new(FileKeyValueStore::in_dir(dir)?),
                ),
                None => (
                    Arc::new(MemoryCookieStore::new()),
                    Arc::new(MemoryKeyValueStore::new()),
                ),
            };
        let client = crate::backend::BackendClient::new(config.clone());
        Ok(Self::init(config, cookies, storage, client.clone(), client))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cookie::Cookie;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::storage::{MemoryCookieStore, MemoryKeyValueStore};

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

    #[derive(Default)]
    struct FakeRoles {
        role: Option<&'static str>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl RoleSource for Arc<FakeRoles> {
        async fn fetch_role(
            &self,
            _user_id: &UserId,
            _access_token: Option<&str>,
        ) -> Result<Option<String>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Backend {
                    operation: "role lookup",
                    status: Some(500),
                    detail: "boom".into(),
                });
            }
            Ok(self.role.map(str::to_string))
        }
    }

    /// File source that records requests and can hold downloads until released.
    struct FakeFiles {
        bytes: Option<Vec<u8>>,
        requested: Mutex<Vec<(AvatarId, Option<String>)>>,
        gate: Option<Semaphore>,
    }

    impl FakeFiles {
        fn serving(bytes: &[u8]) -> Self {
            Self {
                bytes: Some(bytes.to_vec()),
                requested: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn failing() -> Self {
            Self {
                bytes: None,
                requested: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn gated(bytes: &[u8]) -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::serving(bytes)
            }
        }

        fn requested(&self) -> Vec<(AvatarId, Option<String>)> {
            self.requested.lock().unwrap().clone()
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(16);
            }
        }
    }

    impl FileSource for Arc<FakeFiles> {
        async fn download_file(
            &self,
            file_id: AvatarId,
            access_token: Option<&str>,
        ) -> Result<Vec<u8>, Error> {
            self.requested
                .lock()
                .unwrap()
                .push((file_id, access_token.map(str::to_string)));
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            self.bytes.clone().ok_or_else(|| Error::Backend {
                operation: "file download",
                status: Some(404),
                detail: String::new(),
            })
        }
    }

    struct CountingTaskCache(AtomicUsize);

    impl TaskCache for CountingTaskCache {
        fn clear_all(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Cookie store that keeps every cookie it was handed.
    #[derive(Default)]
    struct RecordingCookies {
        jar: MemoryCookieStore,
        added: Mutex<Vec<Cookie<'static>>>,
    }

    impl CookieStore for RecordingCookies {
        fn get(&self, name: &str) -> Option<String> {
            self.jar.get(name)
        }

        fn add(&self, cookie: Cookie<'static>) -> Result<(), Error> {
            self.added.lock().unwrap().push(cookie.clone());
            self.jar.add(cookie)
        }
    }

    struct Harness {
        cookies: Arc<MemoryCookieStore>,
        storage: Arc<MemoryKeyValueStore>,
        roles: Arc<FakeRoles>,
        files: Arc<FakeFiles>,
    }

    impl Harness {
        fn new(roles: FakeRoles, files: FakeFiles) -> Self {
            Self {
                cookies: Arc::new(MemoryCookieStore::new()),
                storage: Arc::new(MemoryKeyValueStore::new()),
                roles: Arc::new(roles),
                files: Arc::new(files),
            }
        }

        fn session(&self) -> Session<Arc<FakeRoles>, Arc<FakeFiles>> {
            Session::init(
                SessionConfig::new("https://catchup.example.com/api/".parse().unwrap()),
                self.cookies.clone(),
                self.storage.clone(),
                self.roles.clone(),
                self.files.clone(),
            )
        }
    }

    fn default_harness() -> Harness {
        Harness::new(
            FakeRoles {
                role: Some("Admin"),
                ..FakeRoles::default()
            },
            FakeFiles::serving(JPEG),
        )
    }

    #[test]
    fn access_token_is_persisted_and_removed() {
        let harness = default_harness();
        let session = harness.session();

        session.set_access_token(Some("tok-1".into()));
        assert_eq!(harness.cookies.get("accessToken").as_deref(), Some("tok-1"));
        let cookie = harness.cookies.cookie("accessToken").unwrap();
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(session.access_token().as_deref(), Some("tok-1"));

        session.set_access_token(None);
        assert_eq!(harness.cookies.get("accessToken"), None);
        assert_eq!(session.access_token(), None);
    }

    #[test]
    fn refresh_token_is_independent() {
        let harness = default_harness();
        let session = harness.session();

        session.set_access_token(Some("a".into()));
        session.set_refresh_token(Some("r".into()));
        session.set_refresh_token(None);

        assert_eq!(harness.cookies.get("refreshToken"), None);
        assert_eq!(harness.cookies.get("accessToken").as_deref(), Some("a"));
    }

    #[test]
    fn init_restores_persisted_state() {
        let harness = default_harness();
        {
            let session = harness.session();
            session.set_access_token(Some("a".into()));
            session.set_refresh_token(Some("r".into()));
            session.set_user(Some(User::new("u1").with_field("name", "Ana")));
            session.update_avatar(JPEG).unwrap();
        }

        let restored = harness.session();
        assert_eq!(restored.access_token().as_deref(), Some("a"));
        assert_eq!(restored.refresh_token().as_deref(), Some("r"));
        assert_eq!(
            restored.user(),
            Some(User::new("u1").with_field("name", "Ana"))
        );
        assert!(restored.avatar().unwrap().starts_with("data:image/jpeg;base64,"));
        assert!(restored.is_authenticated());
        assert_eq!(restored.cached_role(), "");
    }

    #[test]
    fn file_storage_survives_restart() {
        use crate::storage::{FileCookieStore, FileKeyValueStore};

        let dir = tempfile::tempdir().unwrap();
        let open = || {
            Session::init(
                SessionConfig::new("https://catchup.example.com/".parse().unwrap()),
                Arc::new(FileCookieStore::in_dir(dir.path()).unwrap()),
                Arc::new(FileKeyValueStore::in_dir(dir.path()).unwrap()),
                Arc::new(FakeRoles::default()),
                Arc::new(FakeFiles::serving(JPEG)),
            )
        };

        let session = open();
        session.set_access_token(Some("a".into()));
        session.set_user(Some(User::new("u1")));
        session.update_avatar(JPEG).unwrap();
        drop(session);

        let session = open();
        assert_eq!(session.access_token().as_deref(), Some("a"));
        assert_eq!(session.user().map(|u| u.id), Some(UserId::from("u1")));
        assert!(session.avatar().is_some());

        session.logout();
        let session = open();
        assert!(!session.is_authenticated());
        assert_eq!(session.avatar(), None);
    }

    #[test]
    fn unreadable_persisted_user_is_dropped() {
        let harness = default_harness();
        harness
            .cookies
            .add(session_cookie("user", "{not json", "/", true))
            .unwrap();
        assert_eq!(harness.session().user(), None);
    }

    #[test]
    fn set_user_without_avatar_starts_no_fetch() {
        let harness = default_harness();
        let session = harness.session();

        assert!(session.set_user(Some(User::new("u1"))).is_none());
        assert!(harness.files.requested().is_empty());
        assert!(harness.cookies.get("user").unwrap().contains("\"u1\""));
    }

    #[test]
    fn set_user_outside_runtime_keeps_user() {
        let harness = default_harness();
        let session = harness.session();

        let task = session.set_user(Some(User::new("u1").with_avatar_id(AvatarId(42))));
        assert!(task.is_none());
        assert_eq!(session.user().unwrap().id, UserId::from("u1"));
    }

    #[tokio::test]
    async fn login_with_avatar_caches_encoded_image() {
        let harness = default_harness();
        let session = harness.session();

        let user = User::new("u1").with_avatar_id(AvatarId(42));
        let task = session
            .sign_in(TokenPair::new("tok", Some("ref".into())), user)
            .expect("avatar fetch started");
        assert_eq!(task.avatar_id(), AvatarId(42));

        let outcome = task.wait().await;
        assert!(matches!(outcome, AvatarOutcome::Stored(_)));
        assert_eq!(
            harness.files.requested(),
            vec![(AvatarId(42), Some("tok".to_string()))]
        );

        let stored = harness.storage.get("userAvatar").unwrap();
        assert!(stored.starts_with("data:image/jpeg;base64,"));
        assert_eq!(session.avatar(), Some(stored));
    }

    #[tokio::test]
    async fn avatar_download_failure_is_not_fatal() {
        let harness = Harness::new(FakeRoles::default(), FakeFiles::failing());
        let session = harness.session();

        let task = session
            .set_user(Some(User::new("u1").with_avatar_id(AvatarId(7))))
            .unwrap();
        let outcome = task.wait().await;

        assert!(matches!(outcome, AvatarOutcome::Failed(Error::AvatarFetchFailed(_))));
        assert_eq!(session.user().unwrap().id, UserId::from("u1"));
        assert_eq!(session.avatar(), None);
        assert_eq!(harness.storage.get("userAvatar"), None);
    }

    #[tokio::test]
    async fn late_avatar_after_logout_is_discarded() {
        let harness = Harness::new(FakeRoles::default(), FakeFiles::gated(JPEG));
        let session = harness.session();

        let task = session
            .set_user(Some(User::new("u1").with_avatar_id(AvatarId(42))))
            .unwrap();
        session.logout();
        harness.files.release();

        assert!(matches!(task.wait().await, AvatarOutcome::Cancelled));
        assert_eq!(session.avatar(), None);
        assert_eq!(harness.storage.get("userAvatar"), None);
    }

    #[tokio::test]
    async fn newer_user_supersedes_pending_avatar() {
        let harness = Harness::new(FakeRoles::default(), FakeFiles::gated(JPEG));
        let session = harness.session();

        let first = session
            .set_user(Some(User::new("u1").with_avatar_id(AvatarId(1))))
            .unwrap();
        let second = session
            .set_user(Some(User::new("u2").with_avatar_id(AvatarId(2))))
            .unwrap();
        harness.files.release();

        assert!(matches!(first.wait().await, AvatarOutcome::Cancelled));
        assert!(matches!(second.wait().await, AvatarOutcome::Stored(_)));
        assert!(session.avatar().is_some());
    }

    #[tokio::test]
    async fn clearing_user_clears_avatar_and_role() {
        let harness = default_harness();
        let session = harness.session();

        let user = User::new("u1").with_avatar_id(AvatarId(42));
        session.set_user(Some(user)).unwrap().wait().await;
        session.get_role(&UserId::from("u1")).await.unwrap();
        assert_eq!(session.cached_role(), "Admin");

        assert!(session.set_user(None).is_none());
        assert_eq!(session.user(), None);
        assert_eq!(session.avatar(), None);
        assert_eq!(session.cached_role(), "");
        assert_eq!(harness.cookies.get("user"), None);
        assert_eq!(harness.storage.get("userAvatar"), None);
    }

    #[tokio::test]
    async fn switching_user_drops_previous_avatar_and_role() {
        let harness = default_harness();
        let session = harness.session();

        let user = User::new("u1").with_avatar_id(AvatarId(42));
        session.set_user(Some(user)).unwrap().wait().await;
        session.get_role(&UserId::from("u1")).await.unwrap();
        assert!(session.avatar().is_some());

        assert!(session.set_user(Some(User::new("u2"))).is_none());
        assert_eq!(session.user().unwrap().id, UserId::from("u2"));
        assert_eq!(session.avatar(), None);
        assert_eq!(session.cached_role(), "");
        assert_eq!(harness.storage.get("userAvatar"), None);
    }

    #[tokio::test]
    async fn same_user_keeps_avatar_and_role() {
        let harness = default_harness();
        let session = harness.session();

        let user = User::new("u1").with_avatar_id(AvatarId(42));
        session.set_user(Some(user)).unwrap().wait().await;
        session.get_role(&UserId::from("u1")).await.unwrap();
        let avatar = session.avatar().unwrap();

        let renamed = User::new("u1")
            .with_avatar_id(AvatarId(42))
            .with_field("name", "Ana");
        let task = session.set_user(Some(renamed)).unwrap();
        assert_eq!(session.avatar(), Some(avatar.clone()));
        assert_eq!(session.cached_role(), "Admin");
        task.wait().await;
        assert_eq!(session.avatar(), Some(avatar.clone()));
        assert_eq!(session.cached_role(), "Admin");
        assert_eq!(harness.storage.get("userAvatar"), Some(avatar));
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let harness = default_harness();
        let session = harness.session();
        let task_cache = Arc::new(CountingTaskCache(AtomicUsize::new(0)));
        session.set_task_cache(task_cache.clone());

        let user = User::new("u1").with_avatar_id(AvatarId(42));
        session
            .sign_in(TokenPair::new("a", Some("r".into())), user)
            .unwrap()
            .wait()
            .await;
        session.get_role(&UserId::from("u1")).await.unwrap();

        session.logout();

        assert_eq!(session.access_token(), None);
        assert_eq!(session.refresh_token(), None);
        assert_eq!(session.user(), None);
        assert_eq!(session.avatar(), None);
        assert_eq!(session.cached_role(), "");
        assert!(!session.is_authenticated());
        for key in ["accessToken", "refreshToken", "user"] {
            assert_eq!(harness.cookies.get(key), None, "{key} still persisted");
        }
        assert_eq!(harness.storage.get("userAvatar"), None);
        assert_eq!(task_cache.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn role_is_fetched_once() {
        let harness = default_harness();
        let session = harness.session();
        let user_id = UserId::from("u1");

        assert_eq!(session.get_role(&user_id).await.unwrap(), "Admin");
        assert_eq!(session.get_role(&user_id).await.unwrap(), "Admin");
        assert_eq!(harness.roles.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.role_state(), RoleState::Resolved("Admin".into()));
    }

    #[tokio::test]
    async fn empty_user_id_is_rejected_without_request() {
        let harness = default_harness();
        let session = harness.session();

        let err = session.get_role(&UserId::from("")).await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        assert_eq!(harness.roles.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn role_fetch_failure_leaves_cache_empty() {
        let harness = Harness::new(
            FakeRoles {
                fail: true,
                ..FakeRoles::default()
            },
            FakeFiles::serving(JPEG),
        );
        let session = harness.session();

        let err = session.get_role(&UserId::from("u2")).await;
        assert!(matches!(err, Err(Error::RoleFetchFailed(_))));
        assert_eq!(session.cached_role(), "");
    }

    #[tokio::test]
    async fn missing_role_uses_configured_default() {
        let harness = Harness::new(FakeRoles::default(), FakeFiles::serving(JPEG));
        let session = Session::init(
            SessionConfig::new("https://catchup.example.com/".parse().unwrap())
                .with_default_role("Mentee"),
            harness.cookies.clone(),
            harness.storage.clone(),
            harness.roles.clone(),
            harness.files.clone(),
        );

        assert_eq!(session.get_role(&UserId::from("u1")).await.unwrap(), "Mentee");
    }

    #[test]
    fn update_avatar_rejects_empty_bytes() {
        let harness = default_harness();
        let session = harness.session();

        let err = session.update_avatar(&[]);
        assert!(matches!(err, Err(Error::EncodingFailed(_))));
        assert_eq!(session.avatar(), None);

        let encoded = session.update_avatar(JPEG).unwrap();
        assert_eq!(harness.storage.get("userAvatar"), Some(encoded.clone()));
        assert_eq!(session.avatar(), Some(encoded));
    }

    #[test]
    fn update_avatar_accepts_svg() {
        let harness = default_harness();
        let session = harness.session();

        let svg = br#"<?xml version="1.0"?><svg xmlns="http://www.w3.org/2000/svg"/>"#;
        let encoded = session.update_avatar(svg).unwrap();
        assert!(encoded.starts_with("data:image/svg+xml;base64,"));
        assert_eq!(harness.storage.get("userAvatar"), Some(encoded));
    }

    #[test]
    fn cookies_are_removed_on_configured_path() {
        let harness = default_harness();
        let cookies = Arc::new(RecordingCookies::default());
        let session = Session::init(
            SessionConfig::new("https://catchup.example.com/".parse().unwrap())
                .with_cookie_path("/app"),
            cookies.clone(),
            harness.storage.clone(),
            harness.roles.clone(),
            harness.files.clone(),
        );

        session.set_access_token(Some("t".into()));
        session.set_access_token(None);

        let added = cookies.added.lock().unwrap();
        assert_eq!(added.len(), 2);
        assert!(added.iter().all(|c| c.name() == "accessToken"));
        assert!(added.iter().all(|c| c.path() == Some("/app")));
        assert_eq!(added[1].max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookies.get("accessToken"), None);
    }

    #[test]
    fn insecure_cookies_when_configured() {
        let harness = default_harness();
        let session = Session::init(
            SessionConfig::new("http://localhost:5000/".parse().unwrap())
                .with_secure_cookies(false),
            harness.cookies.clone(),
            harness.storage.clone(),
            harness.roles.clone(),
            harness.files.clone(),
        );
        session.set_access_token(Some("t".into()));
        assert_eq!(harness.cookies.cookie("accessToken").unwrap().secure(), Some(false));
    }
}
