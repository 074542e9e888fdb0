//! LRU page cache for rendered pages

use std::num::NonZeroUsize;
use std::sync::Arc;

use log::debug;
use lru::LruCache;

use crate::types::{PixelBuffer, Word};

/// A rendered page: bitmap plus the words found on it
#[derive(Debug)]
pub struct CacheEntry {
    pub page_index: usize,
    pub pixels: Arc<PixelBuffer>,
    pub words: Arc<[Word]>,
}

/// LRU cache of rendered pages keyed by page index.
///
/// Lives on the consumer thread only, so there is no locking.
pub struct PageCache {
    cache: LruCache<usize, Arc<CacheEntry>>,
}

impl PageCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Get a cached page, promoting it in the LRU order
    #[must_use]
    pub fn get(&mut self, page: usize) -> Option<Arc<CacheEntry>> {
        self.cache.get(&page).cloned()
    }

    /// Read a cached page without touching the LRU order
    #[must_use]
    pub fn peek(&self, page: usize) -> Option<Arc<CacheEntry>> {
        self.cache.peek(&page).cloned()
    }

    /// Check if a page is in the cache without promoting it
    #[must_use]
    pub fn has(&self, page: usize) -> bool {
        self.cache.contains(&page)
    }

    /// Insert or replace a page, mark it freshest and evict the least
    /// recently used page if over capacity. Returns the evicted page index.
    pub fn put(
        &mut self,
        page: usize,
        pixels: Arc<PixelBuffer>,
        words: Arc<[Word]>,
    ) -> (Arc<CacheEntry>, Option<usize>) {
        let entry = Arc::new(CacheEntry {
            page_index: page,
            pixels,
            words,
        });

        let evicted = match self.cache.push(page, entry.clone()) {
            Some((old, _)) if old != page => {
                debug!("Evicted page {old} from cache");
                Some(old)
            }
            _ => None,
        };

        (entry, evicted)
    }

    /// Clear all cached pages
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Cached page indices, freshest first
    #[must_use]
    pub fn pages(&self) -> Vec<usize> {
        self.cache.iter().map(|(k, _)| *k).collect()
    }

    /// Number of cached pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cache capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::types::PixelFormat;

    fn pixels() -> Arc<PixelBuffer> {
        Arc::new(PixelBuffer {
            width: 2,
            height: 2,
            format: PixelFormat::Rgba8,
            data: vec![0; 16],
        })
    }

    fn words(page: usize) -> Arc<[Word]> {
        vec![Word {
            text: format!("p{page}"),
            bbox: crate::types::BBox::new(0.0, 0.0, 10.0, 10.0),
            page_index: page,
        }]
        .into()
    }

    #[test]
    fn cache_put_and_get() {
        let mut cache = PageCache::new(6);
        cache.put(3, pixels(), words(3));

        assert!(cache.has(3));
        let entry = cache.get(3).expect("page 3 cached");
        assert_eq!(entry.page_index, 3);
        assert_eq!(entry.words[0].text, "p3");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_lru_eviction() {
        let mut cache = PageCache::new(2);

        let (_, e0) = cache.put(0, pixels(), words(0));
        let (_, e1) = cache.put(1, pixels(), words(1));
        let (_, e2) = cache.put(2, pixels(), words(2));

        assert_eq!((e0, e1, e2), (None, None, Some(0)));
        assert_eq!(cache.len(), 2);
        assert!(!cache.has(0));
        assert!(cache.has(1));
        assert!(cache.has(2));
    }

    #[test]
    fn get_refreshes_entry() {
        let mut cache = PageCache::new(2);
        cache.put(0, pixels(), words(0));
        cache.put(1, pixels(), words(1));

        let _ = cache.get(0);
        let (_, evicted) = cache.put(2, pixels(), words(2));

        assert_eq!(evicted, Some(1));
        assert!(cache.has(0));
    }

    #[test]
    fn has_and_peek_do_not_refresh() {
        let mut cache = PageCache::new(2);
        cache.put(0, pixels(), words(0));
        cache.put(1, pixels(), words(1));

        assert!(cache.has(0));
        assert!(cache.peek(0).is_some());
        let (_, evicted) = cache.put(2, pixels(), words(2));

        assert_eq!(evicted, Some(0));
    }

    #[test]
    fn replacing_a_page_evicts_nothing() {
        let mut cache = PageCache::new(2);
        cache.put(0, pixels(), words(0));
        cache.put(1, pixels(), words(1));

        let (_, evicted) = cache.put(0, pixels(), words(0));
        assert_eq!(evicted, None);
        assert_eq!(cache.pages(), vec![0, 1]);
    }

    #[test]
    fn clear_empties_cache() {
        let mut cache = PageCache::new(6);
        for i in 0..5 {
            cache.put(i, pixels(), words(i));
        }

        assert_eq!(cache.len(), 5);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let cache = PageCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn random_access_matches_reference_model() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let capacity = 4;
        let mut cache = PageCache::new(capacity);
        // Freshest at the end
        let mut model: Vec<usize> = Vec::new();

        for _ in 0..2_000 {
            let page = rng.gen_range(0..10);
            if rng.gen_bool(0.6) {
                let (_, evicted) = cache.put(page, pixels(), words(page));
                model.retain(|&p| p != page);
                model.push(page);
                let expected = if model.len() > capacity {
                    Some(model.remove(0))
                } else {
                    None
                };
                assert_eq!(evicted, expected);
            } else {
                let hit = cache.get(page).is_some();
                let model_hit = model.contains(&page);
                assert_eq!(hit, model_hit);
                if model_hit {
                    model.retain(|&p| p != page);
                    model.push(page);
                }
            }
            assert!(cache.len() <= capacity);
        }

        let mut freshest_first = model.clone();
        freshest_first.reverse();
        assert_eq!(cache.pages(), freshest_first);
    }
}
