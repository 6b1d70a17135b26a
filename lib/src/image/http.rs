use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::asset::{Asset, AssetId, AssetStore, Origin};
use crate::error::{Chainable, Error, Result};
use crate::image::RemoteCache;
use crate::recipe::RecipeId;

type Hasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;

/// A download cache for remote images, kept in a directory across builds.
///
/// Each URL is downloaded at most once per process, however many recipes or
/// tasks ask for it. Files already in the cache directory are reused without
/// touching the network. Offline caches only serve what is already cached.
#[derive(Debug)]
pub struct HttpCache {
    client: reqwest::Client,
    dir: PathBuf,
    offline: bool,
    retries: u32,
    store: Arc<AssetStore>,
    downloads: DashMap<Arc<str>, Arc<OnceCell<Option<Arc<Path>>>>, Hasher>,
}

const DEFAULT_EXT: &str = "jpg";

/// Delay before retry number `attempt`, starting at 1.
fn backoff(attempt: u32) -> Duration {
    let ms = 500u64
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(5000);

    Duration::from_millis(ms)
}

impl HttpCache {
    pub fn new<P: AsRef<Path>>(dir: P, store: Arc<AssetStore>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).chain_with(|| error! {
            "failed to create image cache directory",
            "path" => dir.display(),
        })?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("cookbook/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(HttpCache {
            client,
            dir: dir.to_path_buf(),
            offline: false,
            retries: 2,
            store,
            downloads: DashMap::default(),
        })
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn store(&self) -> &Arc<AssetStore> {
        &self.store
    }

    /// Where `url` is cached: a hash of the URL plus the extension of the
    /// URL's last path segment.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let ext = url::Url::parse(url).ok()
            .and_then(|url| {
                let name = url.path_segments()?.last()?.to_string();
                let ext = Path::new(&name).extension()?.to_str()?.to_ascii_lowercase();
                let valid = ext.len() <= 5 && ext.bytes().all(|b| b.is_ascii_alphanumeric());
                valid.then_some(ext)
            })
            .unwrap_or_else(|| DEFAULT_EXT.to_string());

        let hash = Sha256::digest(url.as_bytes());
        self.dir.join(format!("{}.{}", hex::encode(&hash[..16]), ext))
    }

    /// Returns the local path of `url`, downloading it if necessary, or
    /// `None` if it can't be had.
    pub async fn download(&self, url: &str) -> Option<Arc<Path>> {
        let cell = self.downloads.entry(url.into()).or_default().clone();
        cell.get_or_init(|| self.fill(url)).await.clone()
    }

    async fn fill(&self, url: &str) -> Option<Arc<Path>> {
        let path = self.cache_path(url);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(url, path = %path.display(), "using cached image");
            return Some(path.into());
        }

        if self.offline {
            tracing::warn!(url, "image is not cached and the build is offline");
            return None;
        }

        match self.fetch(url, &path).await {
            Ok(()) => {
                tracing::info!(url, "downloaded image");
                Some(path.into())
            }
            Err(e) => {
                tracing::warn!(url, "download failed:\n{e}");
                None
            }
        }
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let max_attempts = self.retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let reason = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let bytes = resp.bytes().await?;
                    let part = dest.with_extension("part");
                    tokio::fs::write(&part, &bytes).await?;
                    tokio::fs::rename(&part, dest).await?;
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.as_u16() == 408
                        || status.as_u16() == 429
                        || status.is_server_error();

                    if !retryable || attempt >= max_attempts {
                        return err!("unexpected HTTP status", "url" => url, "status" => status);
                    }

                    status.to_string()
                }
                Err(e) if attempt < max_attempts => e.to_string(),
                Err(e) => return Err(Error::from(e).chain(error!("request failed", "url" => url))),
            };

            let delay = backoff(attempt);
            tracing::warn!(url, attempt, %reason, "retrying in {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteCache for HttpCache {
    async fn fetch_and_cache(&self, url: &str, parent: &RecipeId) -> Option<AssetId> {
        let path = self.download(url).await?;
        let asset = Asset::new(path, Origin::Remote { url: url.into() }, Some(parent.clone()));
        Some(self.store.register(asset).id.clone())
    }
}
