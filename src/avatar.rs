use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::backend::FileSource;
use crate::error::Error;
use crate::storage::KeyValueStore;
use crate::types::AvatarId;

/// Result of a best-effort avatar refresh.
#[derive(Debug)]
#[non_exhaustive]
pub enum AvatarOutcome {
    /// The avatar was downloaded, encoded and stored.
    Stored(String),
    /// No avatar id; any cached avatar was removed.
    Cleared,
    /// Download or encoding failed. The cached avatar was left untouched.
    Failed(Error),
    /// The task was aborted or superseded before its result was applied.
    Cancelled,
}

impl AvatarOutcome {
    /// Encoded avatar, when one was stored.
    #[must_use]
    pub fn encoded(&self) -> Option<&str> {
        match self {
            Self::Stored(encoded) => Some(encoded),
            _ => None,
        }
    }
}

/// Type used when the leading bytes match no known image signature.
const FALLBACK_MIME: &str = "application/octet-stream";

/// Detects the image type from its leading bytes.
fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"II*\0", "image/tiff"),
        (b"MM\0*", "image/tiff"),
        (&[0x00, 0x00, 0x01, 0x00], "image/x-icon"),
    ];

    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        match &bytes[8..12] {
            b"avif" | b"avis" => return Some("image/avif"),
            b"heic" | b"heix" | b"mif1" => return Some("image/heic"),
            _ => {}
        }
    }
    if let Some(mime) = SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, mime)| *mime)
    {
        return Some(mime);
    }
    is_svg(bytes).then_some("image/svg+xml")
}

fn is_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    (head.starts_with("<svg") || head.starts_with("<?xml")) && head.contains("<svg")
}

/// Encodes raw image bytes as a `data:` URL.
///
/// The media type is sniffed from the leading bytes; unknown content is
/// encoded as `application/octet-stream`.
///
/// # Errors
///
/// Returns [`Error::EncodingFailed`] if `bytes` is empty.
pub fn encode_data_url(bytes: &[u8]) -> Result<String, Error> {
    if bytes.is_empty() {
        return Err(Error::EncodingFailed("empty image data".into()));
    }
    let mime = sniff_mime(bytes).unwrap_or(FALLBACK_MIME);
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

/// Profile image cached as text in a [`KeyValueStore`].
#[derive(Clone)]
pub struct AvatarCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl AvatarCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Encode `bytes`, store the result under the avatar key and return it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncodingFailed`] for unreadable image data, or
    /// [`Error::Storage`] if the store rejects the write.
    pub fn encode_and_store(&self, bytes: &[u8]) -> Result<String, Error> {
        let encoded = encode_data_url(bytes)?;
        self.store_encoded(&encoded)?;
        Ok(encoded)
    }

    /// Store an already encoded avatar.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store rejects the write.
    pub fn store_encoded(&self, encoded: &str) -> Result<(), Error> {
        self.store.set(&self.key, encoded)
    }

    /// Previously stored avatar, if any.
    #[must_use]
    pub fn load_cached(&self) -> Option<String> {
        self.store.get(&self.key)
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            tracing::warn!(error = %e, "Failed to remove cached avatar");
        }
    }

    /// Download, encode and store the avatar for `avatar_id`.
    ///
    /// Never fails: problems are logged and reported as [`AvatarOutcome::Failed`].
    pub async fn fetch_and_cache<F: FileSource>(
        &self,
        avatar_id: Option<AvatarId>,
        files: &F,
        access_token: Option<&str>,
    ) -> AvatarOutcome {
        let Some(avatar_id) = avatar_id else {
            self.clear();
            return AvatarOutcome::Cleared;
        };

        match download(avatar_id, files, access_token).await {
            Ok(bytes) => self.store_download(avatar_id, &bytes),
            Err(e) => AvatarOutcome::Failed(e),
        }
    }

    /// Encode and store downloaded bytes, reporting the result.
    pub(crate) fn store_download(&self, avatar_id: AvatarId, bytes: &[u8]) -> AvatarOutcome {
        match self.encode_and_store(bytes) {
            Ok(encoded) => {
                tracing::debug!(avatar_id = %avatar_id, len = encoded.len(), "Avatar cached");
                AvatarOutcome::Stored(encoded)
            }
            Err(e) => {
                tracing::warn!(error = %e, avatar_id = %avatar_id, "Avatar encoding failed");
                AvatarOutcome::Failed(e)
            }
        }
    }
}

/// Download the raw avatar image.
pub(crate) async fn download<F: FileSource>(
    avatar_id: AvatarId,
    files: &F,
    access_token: Option<&str>,
) -> Result<Vec<u8>, Error> {
    files
        .download_file(avatar_id, access_token)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, avatar_id = %avatar_id, "Avatar download failed");
            Error::AvatarFetchFailed(e.to_string())
        })
}
