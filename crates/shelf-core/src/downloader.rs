use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::error::AppError;
use crate::fetch::ProxiedFetcher;
use crate::models::ImageSet;
use crate::proxy::ProxySource;
use crate::traits::HttpTransport;
use crate::util::{compute_hash, normalize_url};

const DEFAULT_EXTENSION: &str = ".jpg";
const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "avif", "svg"];

/// Default number of concurrent fetches per `fetch_many` call.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Outcome of one URL in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded(String),
    AlreadyPresent(String),
    Failed { url: String, error: String },
}

/// Summary of a `fetch_many` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Relative paths of every URL that is now on disk, in input order.
    pub paths: Vec<String>,
    pub requested: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadReport {
    pub fn incomplete(&self) -> bool {
        self.paths.len() < self.requested
    }

    pub fn image_set(&self) -> ImageSet {
        ImageSet {
            local_paths: self.paths.clone(),
            total: self.requested as u32,
            stored: self.paths.len() as u32,
            incomplete: self.incomplete(),
        }
    }
}

/// Extension from the last path segment of `url`, or `.jpg`.
pub fn sniff_extension(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or_default().to_string());

    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// `<ns>/<h[0:2]>/<h[2:4]>/<h[4:6]>/<h><ext>` for an absolute URL.
pub fn content_address(namespace: &str, absolute_url: &str) -> String {
    let hash = compute_hash(absolute_url);
    format!(
        "{namespace}/{}/{}/{}/{hash}{}",
        &hash[0..2],
        &hash[2..4],
        &hash[4..6],
        sniff_extension(absolute_url)
    )
}

/// Downloads binary assets to content-addressed paths under a storage root.
///
/// The address is derived from the normalized URL, so a URL already on disk
/// is never fetched again.
#[derive(Clone)]
pub struct ContentDownloader<T: HttpTransport, P: ProxySource> {
    fetcher: ProxiedFetcher<T, P>,
    root: PathBuf,
    base_url: String,
    concurrency: usize,
}

impl<T: HttpTransport, P: ProxySource> ContentDownloader<T, P> {
    pub fn new(
        fetcher: ProxiedFetcher<T, P>,
        root: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            root: root.into(),
            base_url: base_url.into(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// [`fetch_many`](Self::fetch_many) with the configured concurrency.
    pub async fn fetch_all(&self, urls: &[String], namespace: &str) -> DownloadReport {
        self.fetch_many(urls, namespace, self.concurrency).await
    }

    /// Downloads `urls` with at most `concurrency_limit` fetches in flight.
    ///
    /// Blank URLs are ignored and duplicates collapse to one entry. A failed
    /// URL is counted and logged without affecting the others.
    pub async fn fetch_many(
        &self,
        urls: &[String],
        namespace: &str,
        concurrency_limit: usize,
    ) -> DownloadReport {
        let mut unique: Vec<&str> = Vec::with_capacity(urls.len());
        for url in urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            if !unique.contains(&url) {
                unique.push(url);
            }
        }

        let fetches: Vec<_> = unique
            .iter()
            .map(|&url| self.fetch_one(url, namespace))
            .collect();
        let statuses: Vec<DownloadStatus> = stream::iter(fetches)
            .buffered(concurrency_limit.max(1))
            .collect()
            .await;

        let mut report = DownloadReport {
            requested: unique.len(),
            ..DownloadReport::default()
        };
        for status in statuses {
            match status {
                DownloadStatus::Downloaded(path) => {
                    report.downloaded += 1;
                    report.paths.push(path);
                }
                DownloadStatus::AlreadyPresent(path) => {
                    report.skipped += 1;
                    report.paths.push(path);
                }
                DownloadStatus::Failed { url, error } => {
                    report.failed += 1;
                    tracing::warn!(%url, %error, "Download failed");
                }
            }
        }

        tracing::debug!(
            namespace,
            requested = report.requested,
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            "Download batch finished"
        );
        report
    }

    async fn fetch_one(&self, raw_url: &str, namespace: &str) -> DownloadStatus {
        let failed = |error: AppError| DownloadStatus::Failed {
            url: raw_url.to_string(),
            error: error.to_string(),
        };

        let url = match normalize_url(raw_url, &self.base_url) {
            Ok(url) => url,
            Err(e) => return failed(e),
        };
        let relative = content_address(namespace, &url);
        let target = self.root.join(&relative);

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return DownloadStatus::AlreadyPresent(relative);
        }

        let bytes = match self.fetcher.get_bytes(&url).await {
            Ok(bytes) => bytes,
            Err(e) => return failed(e),
        };

        match write_atomically(&target, &bytes).await {
            Ok(()) => DownloadStatus::Downloaded(relative),
            Err(e) => failed(e),
        }
    }
}

/// Writes to a sibling temp file, then renames over `target`.
async fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let parent = target
        .parent()
        .ok_or_else(|| AppError::StorageError(format!("{} has no parent", target.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| AppError::StorageError(format!("create {}: {e}", parent.display())))?;

    let tmp = target.with_extension(format!("part-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| AppError::StorageError(format!("write {}: {e}", tmp.display())))?;

    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(AppError::StorageError(format!(
            "rename to {}: {e}",
            target.display()
        )));
    }
    Ok(())
}
