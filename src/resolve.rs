//! The cache-backed fetch-or-refresh workflow.

use crate::{
    cache::{CacheEntry, CacheStore, CACHE_EXPIRY},
    extract::{ExtractionError, Extractor},
};
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::sync::Mutex;
use url::Url;

/// Decides, per source URL, whether a cached extraction can be reused or a
/// fresh one has to run.
///
/// Extraction runs for the same key are serialized through an in-memory
/// per-key lock, so two concurrent requests for the same stale URL launch
/// one browser, not two. The second request re-checks the cache after the
/// first one finishes and gets a hit.
pub struct Resolver {
    extractor: Box<dyn Extractor>,
    store: CacheStore,
    expiry: Duration,
    in_flight: Mutex<HashMap<Url, Arc<Mutex<()>>>>,
}

impl Resolver {
    /// Create a [`Resolver`] with the default [`CACHE_EXPIRY`] window.
    pub fn new(extractor: Box<dyn Extractor>, store: CacheStore) -> Self {
        Resolver {
            extractor,
            store,
            expiry: CACHE_EXPIRY,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Override the expiry window.
    pub fn with_expiry(self, expiry: Duration) -> Self {
        Resolver { expiry, ..self }
    }

    /// Resolve the embedded frame URL for `source_url`.
    ///
    /// A fresh [`CacheEntry`] is returned as-is with no side effects. On a
    /// miss the [`Extractor`] runs, the result is written back to the
    /// [`CacheStore`], and the new URL is returned. Extraction failures
    /// propagate untouched - no retry, no partial cache update.
    pub async fn resolve(
        &self,
        source_url: &Url,
    ) -> Result<Url, ExtractionError> {
        let slot = self.slot(source_url).await;

        let result = {
            let _guard = slot.lock().await;
            self.fetch_or_refresh(source_url).await
        };

        self.release(source_url, &slot).await;

        result
    }

    async fn fetch_or_refresh(
        &self,
        source_url: &Url,
    ) -> Result<Url, ExtractionError> {
        let mut cache = self.store.load();

        if let Some(embed_url) = cache.fresh_url(source_url, self.expiry) {
            log::debug!("Cache hit for \"{}\"", source_url);
            return Ok(embed_url.clone());
        }

        log::debug!("Cache miss for \"{}\", extracting", source_url);
        let embed_url = self.extractor.extract(source_url).await?;

        cache.insert(
            source_url.clone(),
            CacheEntry::new(SystemTime::now(), embed_url.clone()),
        );
        if let Err(e) = self.store.save(&cache) {
            // A lost write only costs an extra extraction next time.
            log::warn!("Unable to persist the cache: {}", e);
        }

        Ok(embed_url)
    }

    async fn slot(&self, source_url: &Url) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(in_flight.entry(source_url.clone()).or_default())
    }

    async fn release(&self, source_url: &Url, slot: &Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;

        // Two handles left (the map's and ours) means nobody is waiting on
        // this key any more, so the slot can go.
        if Arc::strong_count(slot) <= 2 {
            in_flight.remove(source_url);
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("store", &self.store)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An [`Extractor`] that hands out a canned answer and counts its calls.
    #[derive(Clone)]
    struct FakeExtractor {
        calls: Arc<AtomicUsize>,
        result: Result<Url, ()>,
    }

    impl FakeExtractor {
        fn returning(embed_url: &str) -> Self {
            FakeExtractor {
                calls: Arc::default(),
                result: Ok(Url::parse(embed_url).unwrap()),
            }
        }

        fn failing() -> Self {
            FakeExtractor {
                calls: Arc::default(),
                result: Err(()),
            }
        }

        fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(
            &self,
            _page_url: &Url,
        ) -> Result<Url, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield once so concurrent callers can pile up on the key lock.
            tokio::task::yield_now().await;
            self.result
                .clone()
                .map_err(|_| ExtractionError::FrameNotFound)
        }
    }

    fn source() -> Url {
        Url::parse("https://yandex.ru/video/preview/123456789").unwrap()
    }

    fn embed() -> Url {
        Url::parse("https://rutube.ru/play/embed/123").unwrap()
    }

    fn resolver(extractor: &FakeExtractor, store: &CacheStore) -> Resolver {
        Resolver::new(Box::new(extractor.clone()), store.clone())
    }

    #[tokio::test]
    async fn an_empty_cache_triggers_one_extraction_and_fills_the_cache() {
        let temp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(temp.path().join("video_cache.json"));
        let fake = FakeExtractor::returning(embed().as_str());
        let resolver = resolver(&fake, &store);

        let got = resolver.resolve(&source()).await.unwrap();

        assert_eq!(got, embed());
        assert_eq!(fake.calls(), 1);
        assert_eq!(
            store.load().fresh_url(&source(), CACHE_EXPIRY),
            Some(&embed())
        );
    }

    #[tokio::test]
    async fn a_fresh_entry_is_served_without_extracting() {
        let temp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(temp.path().join("video_cache.json"));
        let mut cache = Cache::new();
        cache.insert(source(), CacheEntry::new(SystemTime::now(), embed()));
        store.save(&cache).unwrap();
        let fake = FakeExtractor::returning("https://rutube.ru/play/embed/456");
        let resolver = resolver(&fake, &store);

        let got = resolver.resolve(&source()).await.unwrap();

        assert_eq!(got, embed());
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn a_stale_entry_is_refreshed_and_overwritten() {
        let temp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(temp.path().join("video_cache.json"));
        let two_hours_ago = SystemTime::now() - Duration::from_millis(7_200_000);
        let mut cache = Cache::new();
        let old = Url::parse("https://rutube.ru/play/embed/old").unwrap();
        cache.insert(source(), CacheEntry::new(two_hours_ago, old));
        store.save(&cache).unwrap();
        let fake = FakeExtractor::returning(embed().as_str());
        let resolver = resolver(&fake, &store);

        let got = resolver.resolve(&source()).await.unwrap();

        assert_eq!(got, embed());
        assert_eq!(fake.calls(), 1);
        let refreshed = store.load();
        let entry = refreshed.lookup(&source()).unwrap();
        assert_eq!(entry.url, embed());
        assert!(entry.timestamp > two_hours_ago);
    }

    #[tokio::test]
    async fn resolving_the_same_fresh_key_twice_extracts_at_most_once() {
        let temp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(temp.path().join("video_cache.json"));
        let fake = FakeExtractor::returning(embed().as_str());
        let resolver = resolver(&fake, &store);

        let first = resolver.resolve(&source()).await.unwrap();
        let second = resolver.resolve(&source()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_for_one_key_launch_a_single_extraction() {
        let temp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(temp.path().join("video_cache.json"));
        let fake = FakeExtractor::returning(embed().as_str());
        let resolver = resolver(&fake, &store);

        let src = source();
        let (first, second) = tokio::join!(resolver.resolve(&src), resolver.resolve(&src));

        assert_eq!(first.unwrap(), embed());
        assert_eq!(second.unwrap(), embed());
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn a_zero_expiry_window_makes_every_lookup_a_miss() {
        let temp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(temp.path().join("video_cache.json"));
        let fake = FakeExtractor::returning(embed().as_str());
        let resolver = resolver(&fake, &store).with_expiry(Duration::ZERO);

        resolver.resolve(&source()).await.unwrap();
        resolver.resolve(&source()).await.unwrap();

        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn extraction_failures_propagate_and_leave_the_cache_alone() {
        let temp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(temp.path().join("video_cache.json"));
        let fake = FakeExtractor::failing();
        let resolver = resolver(&fake, &store);

        let err = resolver.resolve(&source()).await.unwrap_err();

        assert!(matches!(err, ExtractionError::FrameNotFound));
        assert_eq!(store.load(), Cache::new());
    }
}
