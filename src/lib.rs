#![doc = include_str!("../README.md")]

pub mod avatar;
pub mod backend;
pub mod config;
pub mod error;
pub mod role;
pub mod session;
pub mod storage;
pub mod types;

// Re-exports for convenient access
pub use avatar::{AvatarCache, AvatarOutcome, encode_data_url};
#[cfg(feature = "http")]
pub use backend::BackendClient;
pub use backend::{FileSource, RoleSource, TaskCache};
pub use config::{SessionConfig, StorageKeys};
pub use error::Error;
pub use role::{RoleResolver, RoleState};
pub use session::{AvatarTask, Session};
pub use storage::{
    CookieStore, FileCookieStore, FileKeyValueStore, KeyValueStore, MemoryCookieStore,
    MemoryKeyValueStore,
};
pub use types::{AvatarId, TokenPair, User, UserId};
