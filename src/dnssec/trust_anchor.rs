use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::records::DsRecord;
use super::{DigestType, DnsSecAlgorithm};
use crate::config::ValidatorConfig;
use crate::error::AnchorError;

type Result<T> = std::result::Result<T, AnchorError>;

/// A root key digest published by IANA, with its validity window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    /// Zone the anchor is for, `"."` for the root
    pub zone: String,
    pub key_tag: u16,
    pub algorithm: DnsSecAlgorithm,
    pub digest_type: DigestType,
    pub digest: Vec<u8>,
    pub valid_from: DateTime<Utc>,
    /// `None` means no announced end of validity
    pub valid_until: Option<DateTime<Utc>>,
}

impl TrustAnchor {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && self.valid_until.is_none_or(|until| now < until)
    }

    /// The anchor is a DS record for the root's KSK
    pub fn as_ds(&self) -> DsRecord {
        DsRecord {
            key_tag: self.key_tag,
            algorithm: self.algorithm,
            digest_type: self.digest_type,
            digest: self.digest.clone(),
        }
    }
}

/// Anchors currently in their validity window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorSet {
    pub anchors: Vec<TrustAnchor>,
    /// Earliest `valid_until` among `anchors`
    pub nearest_expiry: Option<DateTime<Utc>>,
}

impl AnchorSet {
    pub fn current(all: Vec<TrustAnchor>, now: DateTime<Utc>) -> Self {
        let anchors: Vec<TrustAnchor> = all.into_iter().filter(|a| a.is_valid_at(now)).collect();
        let nearest_expiry = anchors.iter().filter_map(|a| a.valid_until).min();
        Self {
            anchors,
            nearest_expiry,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn expires_within(&self, horizon: Duration, now: DateTime<Utc>) -> bool {
        let Ok(horizon) = chrono::Duration::from_std(horizon) else {
            return false;
        };
        self.nearest_expiry
            .is_some_and(|expiry| expiry <= now + horizon)
    }

    /// Anchors for one zone, in DS form
    pub fn ds_records(&self, zone: &str) -> Vec<DsRecord> {
        self.anchors
            .iter()
            .filter(|a| a.zone == zone)
            .map(TrustAnchor::as_ds)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct AnchorDocument {
    #[serde(rename = "Zone")]
    zone: String,
    #[serde(rename = "KeyDigest", default)]
    key_digests: Vec<KeyDigestElement>,
}

#[derive(Debug, Deserialize)]
struct KeyDigestElement {
    #[serde(rename = "@validFrom")]
    valid_from: String,
    #[serde(rename = "@validUntil", default)]
    valid_until: Option<String>,
    #[serde(rename = "KeyTag")]
    key_tag: u16,
    #[serde(rename = "Algorithm")]
    algorithm: u8,
    #[serde(rename = "DigestType")]
    digest_type: u8,
    #[serde(rename = "Digest")]
    digest: String,
}

/// Parse an IANA `root-anchors.xml` document. Anything malformed gives an
/// empty list.
pub fn parse_anchor_document(xml: &str) -> Vec<TrustAnchor> {
    match try_parse_anchor_document(xml) {
        Ok(anchors) => anchors,
        Err(e) => {
            warn!("Ignoring malformed trust anchor document: {}", e);
            Vec::new()
        }
    }
}

fn try_parse_anchor_document(xml: &str) -> std::result::Result<Vec<TrustAnchor>, String> {
    let document: AnchorDocument = quick_xml::de::from_str(xml).map_err(|e| e.to_string())?;
    let zone = crate::dns::common::normalize_name(&document.zone);

    document
        .key_digests
        .into_iter()
        .map(|element| {
            let valid_from = parse_timestamp(&element.valid_from)?;
            let valid_until = element
                .valid_until
                .as_deref()
                .map(parse_timestamp)
                .transpose()?;
            let digest = hex::decode(element.digest.trim())
                .map_err(|e| format!("bad digest for key {}: {}", element.key_tag, e))?;

            Ok(TrustAnchor {
                zone: zone.clone(),
                key_tag: element.key_tag,
                algorithm: DnsSecAlgorithm::from_u8(element.algorithm),
                digest_type: DigestType::from_u8(element.digest_type),
                digest,
                valid_from,
                valid_until,
            })
        })
        .collect()
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {:?}: {}", value, e))
}

/// Persistent copy of the last fetched anchor document
#[async_trait]
pub trait AnchorCache: Send + Sync {
    async fn load(&self) -> Option<String>;
    /// Time since the cached copy was written
    async fn age(&self) -> Option<Duration>;
    async fn store(&self, document: &str) -> Result<()>;
    /// Delete the cached copy and any partial write
    async fn remove(&self);
}

/// File-backed cache. Writes go to a temporary sibling and are renamed into
/// place so readers never see a partial document.
#[derive(Debug, Clone)]
pub struct FileAnchorCache {
    path: PathBuf,
}

impl FileAnchorCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl AnchorCache for FileAnchorCache {
    async fn load(&self) -> Option<String> {
        tokio::fs::read_to_string(&self.path).await.ok()
    }

    async fn age(&self) -> Option<Duration> {
        let modified = tokio::fs::metadata(&self.path).await.ok()?.modified().ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    async fn store(&self, document: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AnchorError::Cache(e.to_string()))?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, document)
            .await
            .map_err(|e| AnchorError::Cache(e.to_string()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| AnchorError::Cache(e.to_string()))?;
        debug!("Cached trust anchors at {}", self.path.display());
        Ok(())
    }

    async fn remove(&self) {
        let _ = tokio::fs::remove_file(self.temp_path()).await;
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}

/// In-process cache, used when anchors come from a local file
#[derive(Debug, Default)]
pub struct MemoryAnchorCache {
    entry: Mutex<Option<(String, Instant)>>,
}

#[async_trait]
impl AnchorCache for MemoryAnchorCache {
    async fn load(&self) -> Option<String> {
        self.entry.lock().as_ref().map(|(doc, _)| doc.clone())
    }

    async fn age(&self) -> Option<Duration> {
        self.entry.lock().as_ref().map(|(_, at)| at.elapsed())
    }

    async fn store(&self, document: &str) -> Result<()> {
        *self.entry.lock() = Some((document.to_string(), Instant::now()));
        Ok(())
    }

    async fn remove(&self) {
        *self.entry.lock() = None;
    }
}

/// Source of the anchor document
#[async_trait]
pub trait AnchorFetcher: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// Downloads the document over HTTPS, retrying transport failures only
pub struct HttpAnchorFetcher {
    client: reqwest::Client,
    url: String,
    max_retries: usize,
}

impl HttpAnchorFetcher {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnchorError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            max_retries: 3,
        })
    }

    async fn fetch_once(&self) -> Result<String> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                AnchorError::Timeout
            } else {
                AnchorError::Fetch(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnchorError::HttpStatus(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| AnchorError::Fetch(e.to_string()))
    }
}

#[async_trait]
impl AnchorFetcher for HttpAnchorFetcher {
    async fn fetch(&self) -> Result<String> {
        let strategy = ExponentialBackoff::from_millis(10)
            .factor(20)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(strategy, || self.fetch_once(), |e: &AnchorError| {
            debug!("Trust anchor fetch attempt failed: {}", e);
            e.is_transient()
        })
        .await
    }
}

/// Reads the document from a local file
#[derive(Debug, Clone)]
pub struct LocalAnchorFetcher {
    path: PathBuf,
}

impl LocalAnchorFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AnchorFetcher for LocalAnchorFetcher {
    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AnchorError::Fetch(format!("{}: {}", self.path.display(), e)))
    }
}

/// Provides the current root trust anchors, refreshing the cached
/// document when it is older than the freshness window.
pub struct TrustAnchorStore {
    cache: Arc<dyn AnchorCache>,
    fetcher: Arc<dyn AnchorFetcher>,
    freshness: Duration,
    fetch_timeout: Duration,
    refresh: tokio::sync::Mutex<()>,
}

impl TrustAnchorStore {
    pub fn new(
        cache: Arc<dyn AnchorCache>,
        fetcher: Arc<dyn AnchorFetcher>,
        freshness: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            fetcher,
            freshness,
            fetch_timeout,
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Production wiring: IANA over HTTPS, cached at the configured path
    pub fn from_config(config: &ValidatorConfig) -> Result<Self> {
        let fetcher = HttpAnchorFetcher::new(&config.anchor_url, config.anchor_fetch_timeout)?;
        Ok(Self::new(
            Arc::new(FileAnchorCache::new(config.anchor_cache_path.clone())),
            Arc::new(fetcher),
            config.anchor_freshness,
            config.anchor_fetch_timeout,
        ))
    }

    /// Anchors from a local document instead of the network
    pub fn from_file(path: impl Into<PathBuf>, config: &ValidatorConfig) -> Self {
        Self::new(
            Arc::new(MemoryAnchorCache::default()),
            Arc::new(LocalAnchorFetcher::new(path)),
            config.anchor_freshness,
            config.anchor_fetch_timeout,
        )
    }

    pub async fn get_anchors(&self, cancel: &CancellationToken) -> Result<AnchorSet> {
        if cancel.is_cancelled() {
            return Err(AnchorError::Cancelled);
        }

        let document = self.document(cancel).await?;
        let all = parse_anchor_document(&document);
        let set = AnchorSet::current(all, Utc::now());
        debug!(
            "{} trust anchors in their validity window, nearest expiry {:?}",
            set.anchors.len(),
            set.nearest_expiry
        );
        Ok(set)
    }

    async fn fresh_cached(&self) -> Option<String> {
        let age = self.cache.age().await?;
        if age >= self.freshness {
            debug!("Cached trust anchors are {:?} old, refreshing", age);
            return None;
        }
        self.cache.load().await
    }

    async fn document(&self, cancel: &CancellationToken) -> Result<String> {
        if let Some(document) = self.fresh_cached().await {
            return Ok(document);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(document) = self.fresh_cached().await {
            return Ok(document);
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.cache.remove().await;
                return Err(AnchorError::Cancelled);
            }
            result = self.fetch_document() => result,
        };

        match fetched {
            Ok(document) => {
                // Runs to completion so no write outlives a cancellation cleanup
                if let Err(e) = self.cache.store(&document).await {
                    warn!("Could not cache trust anchors: {}", e);
                }
                if cancel.is_cancelled() {
                    self.cache.remove().await;
                    return Err(AnchorError::Cancelled);
                }
                info!("Fetched fresh trust anchors");
                Ok(document)
            }
            Err(e) => {
                warn!("Trust anchor fetch failed: {}", e);
                match self.cache.load().await {
                    Some(stale) => {
                        warn!("Using stale cached trust anchors");
                        Ok(stale)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn fetch_document(&self) -> Result<String> {
        let document = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch())
            .await
            .map_err(|_| AnchorError::Timeout)??;

        // Never cache something we cannot use
        if parse_anchor_document(&document).is_empty() {
            return Err(AnchorError::Fetch(
                "document contains no trust anchors".to_string(),
            ));
        }
        Ok(document)
    }
}
