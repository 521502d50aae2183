//! Asset fetchers for the asset cache
//!
//! A fetcher turns a URL into bytes plus a status code. Transport failures are
//! errors; HTTP-level failures are successful fetches with a non-success status,
//! so the cache can decide whether to fall back to an older copy.

use crate::error::{LesionSegError, Result};
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{header, Client};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

/// Timeout for a single HTTP request
pub const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Result of one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    /// HTTP-style status code (local files report 200 or 404)
    pub status: u16,
    pub bytes: Vec<u8>,
}

impl FetchedAsset {
    #[must_use]
    pub fn ok(bytes: Vec<u8>) -> Self {
        Self { status: 200, bytes }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Source of asset bytes
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch `url`, bypassing any intermediate HTTP caches
    ///
    /// # Errors
    /// - `AssetFetchFailure` on transport errors (connection refused, DNS, unreadable file)
    async fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Spinner when the CLI feature is enabled, silent otherwise
    #[must_use]
    pub fn spinner(message: String) -> Self {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")
            {
                pb.set_style(style);
            }
            pb.set_message(message);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            Self::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            let _ = message;
            Self::NoOp
        }
    }

    /// Set length for progress indicator
    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    /// Set position for progress indicator
    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    /// Finish progress indicator with message
    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Fetcher for `http://` and `https://` URLs
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    show_progress: bool,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a fetcher with a custom request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_timeout(timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LesionSegError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            show_progress: false,
        })
    }

    /// Show a spinner while downloading
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        log::debug!("Fetching: {}", url);

        let response = self
            .client
            .get(url)
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| LesionSegError::asset_fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("HTTP error {} for {}", status, url);
            return Ok(FetchedAsset {
                status: status.as_u16(),
                bytes: Vec::new(),
            });
        }

        let total_size = response.content_length();
        let progress = if self.show_progress {
            ProgressIndicator::spinner(format!("Downloading {url}"))
        } else {
            ProgressIndicator::NoOp
        };
        if let Some(total) = total_size {
            progress.set_length(total);
        }

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut bytes = Vec::with_capacity(total_size.unwrap_or(0) as usize);
        let mut buffer = vec![0; 8192];
        loop {
            let bytes_read = stream.read(&mut buffer).await.map_err(|e| {
                progress.finish_with_message("❌ Download failed".to_string());
                LesionSegError::asset_fetch(url, format!("Failed to read download stream: {e}"))
            })?;
            if bytes_read == 0 {
                break;
            }
            bytes.extend_from_slice(buffer.get(..bytes_read).unwrap_or(&[]));
            progress.set_position(bytes.len() as u64);
        }

        progress.finish_with_message(format!("✅ Downloaded {}", crate::cache::format_size(bytes.len() as u64)));
        log::debug!("Downloaded {} bytes from {}", bytes.len(), url);

        Ok(FetchedAsset {
            status: status.as_u16(),
            bytes,
        })
    }
}

/// Fetcher for local paths and `file://` URLs
///
/// Query strings are ignored, so versioned request URLs still resolve to the
/// file on disk. A missing file is reported as status 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl FileFetcher {
    /// Local path a URL refers to
    #[must_use]
    pub fn path_for(url: &str) -> PathBuf {
        let without_scheme = url.strip_prefix("file://").unwrap_or(url);
        let without_query = without_scheme
            .split_once('?')
            .map_or(without_scheme, |(path, _)| path);
        PathBuf::from(without_query)
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let path = Self::path_for(url);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(FetchedAsset::ok(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Local asset not found: {}", path.display());
                Ok(FetchedAsset {
                    status: 404,
                    bytes: Vec::new(),
                })
            },
            Err(e) => Err(LesionSegError::asset_fetch(url, e)),
        }
    }
}

/// Dispatches to [`HttpFetcher`] or [`FileFetcher`] by URL scheme
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new()?,
            file: FileFetcher,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.http = self.http.with_progress(show_progress);
        self
    }

    /// Whether `url` is fetched over the network
    #[must_use]
    pub fn is_remote(url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }
}

#[async_trait]
impl AssetFetcher for DefaultFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        if Self::is_remote(url) {
            self.http.fetch(url).await
        } else {
            self.file.fetch(url).await
        }
    }
}
