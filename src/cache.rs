//! Time-boxed cache for the rendered dashboard page.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Entry {
    content: Option<Arc<[u8]>>,
    cached_at: Option<Instant>,
}

/// Holds one generation of rendered content.
///
/// The actor is the only writer; the lock lets the cache be read from other
/// threads without a data race.
#[derive(Debug)]
pub struct PageCache {
    entry: RwLock<Entry>,
    max_age: Duration,
}

impl PageCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entry: RwLock::new(Entry::default()),
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Cached content if it was stored no more than `max_age` ago.
    pub fn content_if_valid(&self) -> Option<Arc<[u8]>> {
        self.content_if_valid_at(Instant::now())
    }

    pub fn content_if_valid_at(&self, now: Instant) -> Option<Arc<[u8]>> {
        let entry = self.entry.read().unwrap_or_else(|e| e.into_inner());
        let cached_at = entry.cached_at?;
        if now.saturating_duration_since(cached_at) > self.max_age {
            return None;
        }
        entry.content.clone()
    }

    /// Replace the content and restart its age.
    pub fn set_content(&self, content: Arc<[u8]>) {
        self.set_content_at(content, Instant::now());
    }

    pub fn set_content_at(&self, content: Arc<[u8]>, now: Instant) {
        let mut entry = self.entry.write().unwrap_or_else(|e| e.into_inner());
        entry.content = Some(content);
        entry.cached_at = Some(now);
    }
}
