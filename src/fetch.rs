//! Image fetching for URI-valued uniforms.
//!
//! Fetchers are fire-and-forget: `fetch` returns immediately and the completion
//! callback runs later, possibly on another thread. Callbacks must only hand the
//! result off, never touch stage state directly.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, trace};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

use crate::texture::ImageSource;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported URI scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("no image fetcher available for '{0}'")]
    NoFetcher(String),
}

pub type FetchResult = Result<ImageSource, FetchError>;

/// Completion callback handed to [`ImageFetcher::fetch`].
pub type FetchCallback = Box<dyn FnOnce(FetchResult) + Send + 'static>;

pub trait ImageFetcher: Send + Sync {
    /// Starts loading `uri`. `on_complete` is called exactly once.
    fn fetch(&self, uri: &str, on_complete: FetchCallback);
}

const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Loads `data:` URIs and local files on a tokio runtime.
///
/// Decoded images are kept in a small LRU cache keyed by URI, so stages that
/// share a lookup texture only decode it once.
#[derive(Clone)]
pub struct TokioImageFetcher {
    handle: Handle,
    cache: Arc<Mutex<LruCache<String, ImageSource>>>,
}

impl TokioImageFetcher {
    pub fn new(handle: Handle) -> Self {
        Self::with_capacity(handle, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(handle: Handle, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            handle,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Fetcher bound to the runtime of the calling thread, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl std::fmt::Debug for TokioImageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioImageFetcher")
            .field("cached", &self.cached_len())
            .finish()
    }
}

impl ImageFetcher for TokioImageFetcher {
    fn fetch(&self, uri: &str, on_complete: FetchCallback) {
        let cached = self.cache.lock().get(uri).cloned();
        if let Some(image) = cached {
            trace!("image cache hit for {}", uri);
            on_complete(Ok(image));
            return;
        }

        let uri = uri.to_owned();
        let cache = Arc::clone(&self.cache);
        self.handle.spawn(async move {
            let result = load(&uri).await;
            if let Ok(image) = &result {
                debug!("loaded {}x{} image from {}", image.width(), image.height(), short(&uri));
                cache.lock().put(uri, image.clone());
            }
            on_complete(result);
        });
    }
}

async fn load(uri: &str) -> FetchResult {
    let bytes = match Location::parse(uri)? {
        Location::Data(bytes) => bytes,
        Location::File(path) => tokio::fs::read(path).await?,
    };
    Ok(ImageSource::decode(&bytes)?)
}

enum Location {
    Data(Vec<u8>),
    File(PathBuf),
}

impl Location {
    fn parse(uri: &str) -> Result<Self, FetchError> {
        if let Some(rest) = uri.strip_prefix("data:") {
            return decode_data_uri(rest).map(Location::Data);
        }
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(Location::File(PathBuf::from(path)));
        }
        match uri.split_once("://") {
            Some((scheme, _)) => Err(FetchError::UnsupportedScheme(scheme.to_owned())),
            None => Ok(Location::File(PathBuf::from(uri))),
        }
    }
}

/// Only base64 payloads are accepted, e.g. `image/png;base64,iVBOR...`.
fn decode_data_uri(rest: &str) -> Result<Vec<u8>, FetchError> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::InvalidDataUri("missing ','".into()))?;
    if !meta.ends_with(";base64") {
        return Err(FetchError::InvalidDataUri(format!(
            "expected a base64 payload, got '{}'",
            meta
        )));
    }
    Ok(STANDARD.decode(payload.trim())?)
}

/// Data URIs are long; keep log lines readable.
fn short(uri: &str) -> &str {
    match uri.char_indices().nth(48) {
        Some((i, _)) => &uri[..i],
        None => uri,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use std::io::Cursor;
    use tokio::sync::oneshot;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::new(w, h))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    async fn fetch(fetcher: &TokioImageFetcher, uri: &str) -> FetchResult {
        let (tx, rx) = oneshot::channel();
        fetcher.fetch(
            uri,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.unwrap()
    }

    #[test]
    fn data_uri_parsing() {
        let encoded = STANDARD.encode([1u8, 2, 3]);
        let uri = format!("data:image/png;base64,{}", encoded);
        match Location::parse(&uri).unwrap() {
            Location::Data(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            Location::File(_) => panic!("expected data"),
        }
        assert!(matches!(
            Location::parse("data:text/plain,hello"),
            Err(FetchError::InvalidDataUri(_))
        ));
        assert!(matches!(
            Location::parse("https://example.com/a.png"),
            Err(FetchError::UnsupportedScheme(s)) if s == "https"
        ));
        assert!(matches!(Location::parse("textures/a.png"), Ok(Location::File(_))));
    }

    #[tokio::test]
    async fn decodes_data_uris_and_caches() {
        let fetcher = TokioImageFetcher::current().unwrap();
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(4, 2)));

        let image = fetch(&fetcher, &uri).await.unwrap();
        assert_eq!(image.dimensions(), (4, 2));
        assert_eq!(fetcher.cached_len(), 1);

        let again = fetch(&fetcher, &uri).await.unwrap();
        assert_eq!(again, image);
        assert_eq!(fetcher.cached_len(), 1);
    }

    #[tokio::test]
    async fn reads_local_files() {
        let path = std::env::temp_dir().join(format!("slop_stage_fetch_{}.png", std::process::id()));
        std::fs::write(&path, png_bytes(3, 3)).unwrap();

        let fetcher = TokioImageFetcher::current().unwrap();
        let uri = format!("file://{}", path.display());
        let image = fetch(&fetcher, &uri).await.unwrap();
        assert_eq!(image.dimensions(), (3, 3));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_files_and_garbage_fail() {
        let fetcher = TokioImageFetcher::current().unwrap();
        assert!(matches!(
            fetch(&fetcher, "/definitely/not/here.png").await,
            Err(FetchError::Io(_))
        ));
        let garbage = format!("data:image/png;base64,{}", STANDARD.encode(b"not an image"));
        assert!(matches!(fetch(&fetcher, &garbage).await, Err(FetchError::Decode(_))));
        assert_eq!(fetcher.cached_len(), 0);
    }
}
