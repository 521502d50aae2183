//! Versioned on-disk asset cache
//!
//! Assets live in generation directories under the cache root:
//!
//! ```text
//! <root>/
//!   <generation>/
//!     <key>.bin    asset bytes
//!     <key>.json   sidecar: url, sha256, size_bytes, fetched_at
//! ```
//!
//! The generation name is derived from a manifest hash, so shipping a new asset
//! list produces a new generation. [`AssetCache::install`] fills a generation
//! all-or-nothing, [`AssetCache::activate`] deletes every other generation and
//! [`AssetCache::fetch`] serves requests cache-first with a network fallback.

use crate::download::AssetFetcher;
use crate::error::{LesionSegError, Result};
use crate::tracing_config::events;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Environment variable overriding the cache location
pub const CACHE_DIR_ENV: &str = "LESIONSEG_CACHE_DIR";

const BYTES_EXT: &str = "bin";
const SIDECAR_EXT: &str = "json";
const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";

/// Lowercase hex SHA-256 of `bytes`
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// One asset listed in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    /// Expected content digest; a mismatch fails installation
    #[serde(default)]
    pub sha256: Option<String>,
}

/// The set of assets that belong to one cache generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub name: String,
    pub assets: Vec<ManifestEntry>,
}

impl AssetManifest {
    #[must_use]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            assets: Vec::new(),
        }
    }

    /// Add an asset without a pinned digest
    #[must_use]
    pub fn with_asset<S: Into<String>>(mut self, url: S) -> Self {
        self.assets.push(ManifestEntry {
            url: url.into(),
            sha256: None,
        });
        self
    }

    /// Add an asset whose content must hash to `sha256`
    #[must_use]
    pub fn with_pinned_asset<S: Into<String>, D: Into<String>>(mut self, url: S, sha256: D) -> Self {
        self.assets.push(ManifestEntry {
            url: url.into(),
            sha256: Some(sha256.into()),
        });
        self
    }
}

/// Name of one cache generation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheGeneration(String);

impl CacheGeneration {
    /// Derive the generation from the crate version and the manifest contents
    ///
    /// # Examples
    /// ```
    /// use lesionseg::cache::{AssetManifest, CacheGeneration};
    ///
    /// let manifest = AssetManifest::new("lesionseg").with_asset("lesion_256_fp16.onnx");
    /// let generation = CacheGeneration::from_manifest(&manifest);
    /// assert_eq!(generation.as_str().len(), 16);
    /// assert_eq!(generation, CacheGeneration::from_manifest(&manifest));
    /// ```
    #[must_use]
    pub fn from_manifest(manifest: &AssetManifest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
        hasher.update(b"\n");
        hasher.update(manifest.name.as_bytes());
        for entry in &manifest.assets {
            hasher.update(b"\n");
            hasher.update(entry.url.as_bytes());
            if let Some(digest) = &entry.sha256 {
                hasher.update(b"@");
                hasher.update(digest.as_bytes());
            }
        }
        let hex = format!("{:x}", hasher.finalize());
        Self(hex.get(..16).unwrap_or(&hex).to_string())
    }

    /// Explicitly pinned generation name
    ///
    /// # Errors
    /// - Empty name, leading dot, or characters outside `[A-Za-z0-9._-]`
    pub fn named<S: Into<String>>(name: S) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(name))
        } else {
            Err(LesionSegError::invalid_config(format!(
                "Invalid cache generation name '{name}'"
            )))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sidecar metadata stored next to every cached asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub url: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Information about a generation directory on disk
#[derive(Debug, Clone)]
pub struct CachedGenerationInfo {
    pub name: String,
    pub path: PathBuf,
    pub entries: usize,
    pub size_bytes: u64,
    pub is_current: bool,
}

/// Generation-keyed asset cache
#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
    generation: CacheGeneration,
}

impl AssetCache {
    /// Open the cache at the default location
    ///
    /// `$LESIONSEG_CACHE_DIR/assets` when the variable is set, otherwise
    /// `<user cache dir>/lesionseg/assets`.
    ///
    /// # Errors
    /// - Failed to determine the user cache directory
    /// - Failed to create the cache directory
    pub fn new(generation: CacheGeneration) -> Result<Self> {
        Self::open(Self::default_root()?, generation)
    }

    /// Open the cache under a custom directory (`<cache_dir>/assets`)
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path, generation: CacheGeneration) -> Result<Self> {
        Self::open(cache_dir.join("assets"), generation)
    }

    fn open(root: PathBuf, generation: CacheGeneration) -> Result<Self> {
        if !root.exists() {
            fs::create_dir_all(&root)
                .map_err(|e| LesionSegError::file_io_error("create cache directory", &root, &e))?;
        }
        Ok(Self { root, generation })
    }

    /// Default cache root
    ///
    /// # Errors
    /// - Failed to determine user cache directory
    pub fn default_root() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("assets"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                LesionSegError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("lesionseg")
            .join("assets"))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn generation(&self) -> &CacheGeneration {
        &self.generation
    }

    /// Directory of the current generation (may not exist yet)
    #[must_use]
    pub fn generation_dir(&self) -> PathBuf {
        self.root.join(self.generation.as_str())
    }

    /// Cache key of a request URL (the full URL, version query included)
    #[must_use]
    pub fn entry_key(url: &str) -> String {
        let hex = sha256_hex(url.as_bytes());
        hex.get(..16).unwrap_or(&hex).to_string()
    }

    /// Whether the current generation holds a valid copy of `url`
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        Self::lookup(&self.generation_dir(), url).is_some()
    }

    /// Fetch every manifest asset into the current generation
    ///
    /// Assets are downloaded into a staging directory that replaces the
    /// generation directory only when all of them succeeded.
    ///
    /// # Errors
    /// - `AssetFetchFailure` if any asset fails to download, returns a
    ///   non-success status or does not match its pinned digest. The cache is
    ///   left as it was.
    #[instrument(skip(self, fetcher, manifest), fields(generation = %self.generation, assets = manifest.assets.len()))]
    pub async fn install(&self, fetcher: &dyn AssetFetcher, manifest: &AssetManifest) -> Result<()> {
        let staging = self
            .root
            .join(format!("{STAGING_PREFIX}{}-{}", self.generation, std::process::id()));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| {
                LesionSegError::file_io_error("remove stale staging directory", &staging, &e)
            })?;
        }
        fs::create_dir_all(&staging)
            .map_err(|e| LesionSegError::file_io_error("create staging directory", &staging, &e))?;

        match self.fill_staging(fetcher, manifest, &staging).await {
            Ok(()) => self.promote_staging(&staging),
            Err(e) => {
                if let Err(cleanup_err) = fs::remove_dir_all(&staging) {
                    warn!(error = %cleanup_err, "Failed to clean up staging directory");
                }
                Err(e)
            },
        }
    }

    async fn fill_staging(
        &self,
        fetcher: &dyn AssetFetcher,
        manifest: &AssetManifest,
        staging: &Path,
    ) -> Result<()> {
        for entry in &manifest.assets {
            let asset = fetcher.fetch(&entry.url).await?;
            if !asset.is_success() {
                return Err(LesionSegError::asset_fetch(
                    &entry.url,
                    format!("HTTP {}", asset.status),
                ));
            }
            if let Some(expected) = &entry.sha256 {
                let actual = sha256_hex(&asset.bytes);
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(LesionSegError::asset_fetch(
                        &entry.url,
                        format!("digest mismatch: expected {expected}, got {actual}"),
                    ));
                }
            }
            Self::store(staging, &entry.url, &asset.bytes)?;
            debug!(url = %entry.url, bytes = asset.bytes.len(), "Staged asset");
        }
        Ok(())
    }

    fn promote_staging(&self, staging: &Path) -> Result<()> {
        let target = self.generation_dir();
        let retired = self
            .root
            .join(format!("{RETIRED_PREFIX}{}-{}", self.generation, std::process::id()));

        let had_previous = target.exists();
        if had_previous {
            fs::rename(&target, &retired).map_err(|e| {
                LesionSegError::file_io_error("retire previous generation", &target, &e)
            })?;
        }

        if let Err(e) = fs::rename(staging, &target) {
            if had_previous {
                // Put the old generation back so the cache stays usable
                if let Err(restore_err) = fs::rename(&retired, &target) {
                    warn!(
                        error = %restore_err,
                        path = %retired.display(),
                        "Failed to restore previous generation"
                    );
                }
            }
            if let Err(cleanup_err) = fs::remove_dir_all(staging) {
                warn!(error = %cleanup_err, "Failed to clean up staging directory");
            }
            return Err(LesionSegError::file_io_error("install generation", &target, &e));
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!(error = %e, path = %retired.display(), "Failed to remove retired generation");
            }
        }

        info!(generation = %self.generation, "Generation installed");
        Ok(())
    }

    /// Delete every generation except the current one
    ///
    /// Returns the names of the removed generations.
    ///
    /// # Errors
    /// - Failed to read the cache root or remove a directory
    #[instrument(skip(self), fields(generation = %self.generation))]
    pub fn activate(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for (name, path) in self.generation_dirs(true)? {
            if name == self.generation.as_str() {
                continue;
            }
            fs::remove_dir_all(&path).map_err(|e| {
                LesionSegError::file_io_error("remove old generation", &path, &e)
            })?;
            if !name.starts_with('.') {
                info!(removed = %name, "Deleted old cache generation");
                removed.push(name);
            }
        }
        removed.sort();
        Ok(removed)
    }

    /// Install the manifest if needed, then delete every other generation
    ///
    /// The install is skipped when the current generation already holds every
    /// asset. Older generations are only deleted once the current one is
    /// complete, so a failed install leaves them in place as offline fallbacks
    /// for [`fetch`](Self::fetch).
    ///
    /// Returns the names of the removed generations.
    ///
    /// # Errors
    /// - Any error from [`install`](Self::install); no generation is removed
    /// - Any error from [`activate`](Self::activate)
    pub async fn refresh(&self, fetcher: &dyn AssetFetcher, manifest: &AssetManifest) -> Result<Vec<String>> {
        if self.is_complete(manifest) {
            debug!(generation = %self.generation, "Generation already complete");
        } else {
            self.install(fetcher, manifest).await?;
        }
        self.activate()
    }

    /// Whether the current generation holds a valid copy of every manifest asset
    ///
    /// Pinned assets must also match their digest.
    #[must_use]
    pub fn is_complete(&self, manifest: &AssetManifest) -> bool {
        let dir = self.generation_dir();
        manifest.assets.iter().all(|entry| {
            Self::lookup(&dir, &entry.url).is_some_and(|bytes| {
                entry
                    .sha256
                    .as_ref()
                    .map_or(true, |expected| sha256_hex(&bytes).eq_ignore_ascii_case(expected))
            })
        })
    }

    /// Serve `url` cache-first
    ///
    /// 1. A valid copy in the current generation is returned directly.
    /// 2. Otherwise the fetcher is asked; a successful response is stored in the
    ///    current generation and returned.
    /// 3. If the fetch fails or is not successful, a valid copy in any other
    ///    generation is returned.
    ///
    /// Non-success responses are never stored.
    ///
    /// # Errors
    /// - `AssetFetchFailure` when none of the above produced bytes
    #[instrument(skip(self, fetcher), fields(generation = %self.generation))]
    pub async fn fetch(&self, fetcher: &dyn AssetFetcher, url: &str) -> Result<Vec<u8>> {
        let current = self.generation_dir();
        let key = Self::entry_key(url);
        if let Some(bytes) = Self::lookup(&current, url) {
            events::cache_hit(&key, self.generation.as_str());
            return Ok(bytes);
        }
        events::cache_miss(&key, self.generation.as_str());

        let reason = match fetcher.fetch(url).await {
            Ok(asset) if asset.is_success() => {
                if let Err(e) = Self::store(&current, url, &asset.bytes) {
                    warn!(error = %e, "Failed to store fetched asset; serving uncached");
                } else {
                    debug!(bytes = asset.bytes.len(), "Stored fetched asset");
                }
                return Ok(asset.bytes);
            },
            Ok(asset) => format!("HTTP {}", asset.status),
            Err(e) => e.to_string(),
        };

        warn!(%reason, "Network fetch failed, looking for an older cached copy");
        for (name, path) in self.generation_dirs(false)? {
            if name == self.generation.as_str() {
                continue;
            }
            if let Some(bytes) = Self::lookup(&path, url) {
                info!(fallback_generation = %name, "Serving asset from older generation");
                return Ok(bytes);
            }
        }

        Err(LesionSegError::asset_fetch(url, reason))
    }

    /// List generation directories with entry counts and sizes
    ///
    /// # Errors
    /// - Failed to read the cache root
    pub fn list_generations(&self) -> Result<Vec<CachedGenerationInfo>> {
        self.generation_dirs(false)?
            .into_iter()
            .map(|(name, path)| {
                let (entries, size_bytes) = Self::directory_stats(&path)
                    .map_err(|e| LesionSegError::file_io_error("scan generation", &path, &e))?;
                Ok(CachedGenerationInfo {
                    is_current: name == self.generation.as_str(),
                    name,
                    path,
                    entries,
                    size_bytes,
                })
            })
            .collect()
    }

    /// Remove every generation, including the current one
    ///
    /// # Errors
    /// - Failed to read the cache root or remove a directory
    pub fn clear(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for (name, path) in self.generation_dirs(true)? {
            info!(generation = %name, "Removing cache generation");
            fs::remove_dir_all(&path)
                .map_err(|e| LesionSegError::file_io_error("remove cache generation", &path, &e))?;
            if !name.starts_with('.') {
                removed.push(name);
            }
        }
        removed.sort();
        Ok(removed)
    }

    /// Generation directories sorted by name; hidden ones only when requested
    fn generation_dirs(&self, include_hidden: bool) -> Result<Vec<(String, PathBuf)>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root)
            .map_err(|e| LesionSegError::file_io_error("read cache directory", &self.root, &e))?;

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| LesionSegError::file_io_error("read cache entry", &self.root, &e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if include_hidden || !name.starts_with('.') {
                dirs.push((name, path));
            }
        }
        dirs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(dirs)
    }

    fn entry_paths(dir: &Path, url: &str) -> (PathBuf, PathBuf) {
        let key = Self::entry_key(url);
        (
            dir.join(format!("{key}.{BYTES_EXT}")),
            dir.join(format!("{key}.{SIDECAR_EXT}")),
        )
    }

    /// Read a cached copy, treating any inconsistency as a miss
    fn lookup(dir: &Path, url: &str) -> Option<Vec<u8>> {
        let (bytes_path, sidecar_path) = Self::entry_paths(dir, url);
        let sidecar = fs::read_to_string(&sidecar_path).ok()?;
        let metadata: CacheEntryMetadata = match serde_json::from_str(&sidecar) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(error = %e, path = %sidecar_path.display(), "Unreadable sidecar");
                return None;
            },
        };
        if metadata.url != url {
            return None;
        }

        let bytes = fs::read(&bytes_path).ok()?;
        if bytes.len() as u64 != metadata.size_bytes || sha256_hex(&bytes) != metadata.sha256 {
            warn!(path = %bytes_path.display(), "Cached asset failed integrity check");
            return None;
        }
        Some(bytes)
    }

    /// Write bytes and sidecar; bytes go through a temp file and rename
    fn store(dir: &Path, url: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| LesionSegError::file_io_error("create generation directory", dir, &e))?;

        let (bytes_path, sidecar_path) = Self::entry_paths(dir, url);
        let temp_path = bytes_path.with_extension("tmp");
        fs::write(&temp_path, bytes)
            .map_err(|e| LesionSegError::file_io_error("write cached asset", &temp_path, &e))?;
        fs::rename(&temp_path, &bytes_path)
            .map_err(|e| LesionSegError::file_io_error("move cached asset", &bytes_path, &e))?;

        let metadata = CacheEntryMetadata {
            url: url.to_string(),
            sha256: sha256_hex(bytes),
            size_bytes: bytes.len() as u64,
            fetched_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&metadata)?;
        fs::write(&sidecar_path, json)
            .map_err(|e| LesionSegError::file_io_error("write cache sidecar", &sidecar_path, &e))
    }

    fn directory_stats(dir: &Path) -> std::io::Result<(usize, u64)> {
        let mut entries = 0;
        let mut total = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == BYTES_EXT) {
                entries += 1;
            }
            total += entry.metadata()?.len();
        }
        Ok((entries, total))
    }
}

/// Human-readable byte count
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}
