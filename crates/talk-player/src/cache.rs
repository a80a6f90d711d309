//! Local media cache.
//!
//! Remote talk audio is downloaded once into a content-addressed directory; the file name
//! is the FNV-1a hash of the source URL plus the source's extension. Local paths are used
//! in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

/// Largest media body accepted from a remote source.
const MAX_MEDIA_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Copies a media source into a local file.
pub trait MediaFetcher {
    /// Write `source` to `dest`, returning the number of bytes written.
    fn fetch(&self, source: &str, dest: &Path) -> Result<u64>;
}

/// Fetches direct media URLs over HTTP(S).
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .user_agent(user_agent)
            .timeout_connect(Some(Duration::from_secs(10)))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(concat!("talk-player/", env!("CARGO_PKG_VERSION")))
    }
}

impl MediaFetcher for HttpFetcher {
    fn fetch(&self, source: &str, dest: &Path) -> Result<u64> {
        let mut resp = self
            .agent
            .get(source)
            .call()
            .with_context(|| format!("request {source}"))?;
        let mut reader = resp
            .body_mut()
            .with_config()
            .limit(MAX_MEDIA_BYTES)
            .reader();
        let mut file =
            std::fs::File::create(dest).with_context(|| format!("create {:?}", dest))?;
        let bytes = std::io::copy(&mut reader, &mut file)
            .with_context(|| format!("download {source}"))?;
        file.sync_all().with_context(|| format!("sync {:?}", dest))?;
        Ok(bytes)
    }
}

/// Content-addressed media directory.
#[derive(Clone, Debug)]
pub struct MediaCache {
    dir: PathBuf,
}

impl MediaCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache location for `source`, whether or not it has been fetched yet.
    pub fn path_for(&self, source: &str) -> PathBuf {
        self.dir
            .join(format!("{:016x}.{}", fnv1a64(source.as_bytes()), source_extension(source)))
    }

    /// Return a local file for `source`, downloading it on a cache miss.
    pub fn resolve(&self, source: &str, fetcher: &dyn MediaFetcher) -> Result<PathBuf> {
        if !is_remote(source) {
            let path = PathBuf::from(source);
            if !path.is_file() {
                return Err(anyhow!("media file not found: {}", path.display()));
            }
            return Ok(path);
        }

        let path = self.path_for(source);
        if is_cached(&path) {
            tracing::info!(source, path = ?path, "media cache hit");
            return Ok(path);
        }

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache dir {:?}", self.dir))?;
        let mut part = path.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        tracing::info!(source, path = ?path, "fetching media");
        let bytes = match fetcher.fetch(source, &part) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = std::fs::remove_file(&part);
                return Err(e.context(format!("fetch {source}")));
            }
        };
        std::fs::rename(&part, &path)
            .with_context(|| format!("move {:?} into cache", part))?;
        tracing::info!(source, bytes, "media cached");
        Ok(path)
    }
}

pub fn is_remote(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_cached(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Extension of the last path segment, ignoring query and fragment; `media` when absent.
fn source_extension(source: &str) -> String {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => "media".to_string(),
    }
}

/// 64-bit FNV-1a.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
