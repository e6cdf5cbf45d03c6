use anyhow::Result;
use reqwest::{Client, ClientBuilder};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Category;
use crate::css_rewriter;
use crate::error::AssetError;
use crate::extension::infer_extension;
use crate::file_manager::FileManager;
use crate::url_resolver::{is_inline_reference, UrlResolver};

/// An asset that made it to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub url: String,
    pub local_path: String,
    pub category: Category,
}

/// A reference that stayed remote, with the reason it could not be localized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    pub url: String,
    pub category: Category,
    pub reason: String,
}

/// Separate numbering for one family of files, e.g. platform fonts starting at 20.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterNamespace {
    pub name: String,
    pub start: u64,
}

/// Hands out filename suffixes. Never reset during a run.
#[derive(Debug, Default)]
pub struct AssetCounter {
    shared: AtomicU64,
    namespaces: std::sync::Mutex<HashMap<String, u64>>,
}

impl AssetCounter {
    pub fn next(&self, namespace: Option<&CounterNamespace>) -> u64 {
        let Some(namespace) = namespace else {
            return self.shared.fetch_add(1, Ordering::SeqCst);
        };

        let mut namespaces = self
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let next = namespaces
            .entry(namespace.name.clone())
            .or_insert(namespace.start);
        let value = *next;
        *next += 1;
        value
    }
}

type Slot = Arc<OnceCell<Option<StoredAsset>>>;

#[derive(Debug, Clone, Copy)]
enum Body {
    Binary,
    Stylesheet,
}

/// Deduplicating fetcher shared by every pass of one run.
///
/// Each absolute URL gets one slot in the identity map. The first caller fills
/// the slot; everyone else, including concurrent callers, waits for and reuses
/// that result, so a URL is fetched at most once per run. Failures are cached
/// the same way and reported once.
pub struct AssetStore {
    client: Client,
    files: FileManager,
    identity: Mutex<HashMap<String, Slot>>,
    counter: AssetCounter,
    failures: Mutex<Vec<AssetFailure>>,
    fetches: AtomicUsize,
    rewriting: std::sync::Mutex<HashSet<String>>,
}

impl AssetStore {
    pub fn new(client: Client, files: FileManager) -> Self {
        Self {
            client,
            files,
            identity: Mutex::new(HashMap::new()),
            counter: AssetCounter::default(),
            failures: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            rewriting: std::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn build_http_client(user_agent: &str, timeout: Option<Duration>) -> Result<Client> {
        let mut builder = ClientBuilder::new().use_rustls_tls().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }

    /// Number of network requests issued for assets so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Resolves a markup reference, logging and recording it when malformed.
    pub async fn resolve(
        &self,
        resolver: &UrlResolver,
        reference: &str,
        category: Category,
    ) -> Option<Url> {
        match resolver.resolve(reference) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("⚠️  {}", e);
                self.record_failure(reference, category, e.to_string()).await;
                None
            }
        }
    }

    /// Downloads `url` once and returns its local path, or `None` when the
    /// reference must stay as it is.
    pub async fn fetch_asset(&self, url: &Url, category: Category) -> Option<String> {
        self.localize(url, category, None, Body::Binary).await
    }

    pub async fn fetch_asset_in(
        &self,
        url: &Url,
        category: Category,
        namespace: Option<&CounterNamespace>,
    ) -> Option<String> {
        self.localize(url, category, namespace, Body::Binary).await
    }

    /// Like [`fetch_asset`](Self::fetch_asset), but the body is treated as CSS
    /// and its own `url(...)` references are localized before it is saved.
    pub async fn fetch_stylesheet(&self, url: &Url) -> Option<String> {
        self.localize(url, Category::Stylesheet, None, Body::Stylesheet)
            .await
    }

    /// Every asset stored so far, ordered by source URL.
    pub async fn stored_assets(&self) -> Vec<StoredAsset> {
        let slots: Vec<Slot> = self.identity.lock().await.values().cloned().collect();
        let mut assets: Vec<StoredAsset> = slots
            .iter()
            .filter_map(|slot| slot.get().cloned().flatten())
            .collect();
        assets.sort_by(|a, b| a.url.cmp(&b.url));
        assets
    }

    /// True while the stylesheet at `url` is having its own references
    /// localized. Waiting on such a sheet from inside another one can deadlock.
    pub fn is_rewriting(&self, url: &Url) -> bool {
        self.rewriting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url.as_str())
    }

    fn set_rewriting(&self, url: &Url, active: bool) {
        let mut rewriting = self.rewriting.lock().unwrap_or_else(PoisonError::into_inner);
        if active {
            rewriting.insert(url.to_string());
        } else {
            rewriting.remove(url.as_str());
        }
    }

    pub async fn failures(&self) -> Vec<AssetFailure> {
        self.failures.lock().await.clone()
    }

    pub async fn record_failure(&self, url: &str, category: Category, reason: String) {
        self.failures.lock().await.push(AssetFailure {
            url: url.to_string(),
            category,
            reason,
        });
    }

    async fn localize(
        &self,
        url: &Url,
        category: Category,
        namespace: Option<&CounterNamespace>,
        body: Body,
    ) -> Option<String> {
        if is_inline_reference(url.as_str()) {
            return None;
        }

        let slot = {
            let mut identity = self.identity.lock().await;
            identity.entry(url.to_string()).or_default().clone()
        };

        if let Some(stored) = slot.get() {
            debug!(url = %url, "identity map hit");
            return stored.as_ref().map(|asset| asset.local_path.clone());
        }

        let stored = slot
            .get_or_init(|| async {
                match self.download(url, category, namespace, body).await {
                    Ok(asset) => Some(asset),
                    Err(e) => {
                        warn!("⚠️  Failed to download {}: {}", url, e);
                        self.record_failure(url.as_str(), category, e.to_string())
                            .await;
                        None
                    }
                }
            })
            .await;

        stored.as_ref().map(|asset| asset.local_path.clone())
    }

    async fn download(
        &self,
        url: &Url,
        category: Category,
        namespace: Option<&CounterNamespace>,
        body: Body,
    ) -> Result<StoredAsset, AssetError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        debug!(url = %url, %category, "fetching");

        let request_error = |source| AssetError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            return Err(AssetError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let content = response.bytes().await.map_err(request_error)?;

        let (content, extension) = match body {
            Body::Binary => (content.to_vec(), infer_extension(url, &content_type)),
            Body::Stylesheet => {
                let css = std::str::from_utf8(&content).map_err(|_| AssetError::Decode {
                    url: url.to_string(),
                })?;
                let resolver = UrlResolver::new(url.clone());
                // Boxed: stylesheet rewriting calls back into the store.
                let rewrite: Pin<Box<dyn Future<Output = String> + '_>> =
                    Box::pin(css_rewriter::rewrite_stylesheet(self, &resolver, css));
                self.set_rewriting(url, true);
                let rewritten = rewrite.await;
                self.set_rewriting(url, false);
                (rewritten.into_bytes(), ".css".to_string())
            }
        };

        let filename = format!(
            "{}_{}{}",
            category.prefix(),
            self.counter.next(namespace),
            extension
        );

        let saved = self
            .files
            .save_asset(category, &filename, &content)
            .await
            .map_err(|source| AssetError::Io {
                path: self.files.dir_for(category).join(&filename),
                source,
            })?;

        info!("✅ Saved {} -> {:?}", url, saved);

        Ok(StoredAsset {
            url: url.to_string(),
            local_path: self.files.public_path(category, &filename),
            category,
        })
    }
}
