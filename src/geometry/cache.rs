use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::frame::{AnatomicalFrame, Segment};
use crate::config::CacheConfig;
use crate::pose::LandmarkFrame;

/// Monotonic millisecond clock used for cache expiry
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time since construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub segment: Segment,
    pub bucket: u64,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    frame: AnatomicalFrame,
    inserted_ms: u64,
}

/// Bounded, TTL-evicting store of anatomical frames
///
/// Keys round the frame timestamp to `precision_ms`. Entries are never updated in
/// place, so insertion order is also age order and the oldest entry is evicted
/// first when the cache is full.
pub struct FrameCache {
    precision_ms: u64,
    ttl_ms: u64,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

impl FrameCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            precision_ms: config.precision_ms.max(1),
            ttl_ms: config.ttl_ms,
            max_entries: config.max_entries.max(1),
            clock,
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn key(&self, segment: Segment, timestamp_ms: u64) -> CacheKey {
        let p = self.precision_ms;
        CacheKey {
            segment,
            bucket: (timestamp_ms + p / 2) / p,
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<AnatomicalFrame> {
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            Some(entry) if now.saturating_sub(entry.inserted_ms) <= self.ttl_ms => {
                self.hits += 1;
                Some(entry.frame)
            }
            Some(_) => {
                self.entries.remove(key);
                self.order.retain(|k| k != key);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, frame: AnatomicalFrame) {
        let now = self.clock.now_ms();
        self.evict_expired(now);
        if self.entries.contains_key(&key) {
            self.order.retain(|k| *k != key);
        }
        while self.entries.len() >= self.max_entries {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!(
                segment = ?oldest.segment,
                bucket = oldest.bucket,
                "frame cache full, evicted oldest"
            );
        }
        self.entries.insert(
            key,
            CacheEntry {
                frame,
                inserted_ms: now,
            },
        );
        self.order.push_back(key);
    }

    fn evict_expired(&mut self, now: u64) {
        while let Some(front) = self.order.front().copied() {
            let expired = self
                .entries
                .get(&front)
                .map_or(true, |e| now.saturating_sub(e.inserted_ms) > self.ttl_ms);
            if !expired {
                break;
            }
            self.order.pop_front();
            self.entries.remove(&front);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

/// Builds anatomical frames through a cache owned by one processing context
pub struct FrameBuilder {
    cache: FrameCache,
    min_confidence: f32,
    epsilon: f32,
}

impl FrameBuilder {
    pub fn new(cache: FrameCache, min_confidence: f32, epsilon: f32) -> Self {
        Self {
            cache,
            min_confidence,
            epsilon,
        }
    }

    pub fn frame(&mut self, segment: Segment, landmarks: &LandmarkFrame) -> AnatomicalFrame {
        let key = self.cache.key(segment, landmarks.timestamp_ms);
        if let Some(frame) = self.cache.get(&key) {
            return frame;
        }
        let frame = AnatomicalFrame::build(segment, landmarks, self.min_confidence, self.epsilon);
        self.cache.insert(key, frame);
        frame
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{JointName, Landmark, Schema};

    fn cache_config(precision_ms: u64, ttl_ms: u64, max_entries: usize) -> CacheConfig {
        CacheConfig {
            precision_ms,
            ttl_ms,
            max_entries,
        }
    }

    fn dummy(segment: Segment) -> AnatomicalFrame {
        AnatomicalFrame::invalid(segment)
    }

    #[test]
    fn test_key_rounds_to_precision() {
        let cache = FrameCache::new(&cache_config(10, 1000, 8), Arc::new(ManualClock::new(0)));
        assert_eq!(cache.key(Segment::Trunk, 104), cache.key(Segment::Trunk, 96));
        assert_ne!(cache.key(Segment::Trunk, 104), cache.key(Segment::Trunk, 106));
        assert_ne!(cache.key(Segment::Trunk, 100), cache.key(Segment::Pelvis, 100));
    }

    #[test]
    fn test_ttl_eviction() {
        let clock = ManualClock::new(0);
        let mut cache = FrameCache::new(&cache_config(1, 100, 8), Arc::new(clock.clone()));
        let key = cache.key(Segment::Trunk, 5);
        cache.insert(key, dummy(Segment::Trunk));
        clock.advance(100);
        assert!(cache.get(&key).is_some());
        clock.advance(1);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_size_bound_evicts_oldest() {
        let mut cache = FrameCache::new(&cache_config(1, 10_000, 2), Arc::new(ManualClock::new(0)));
        let k1 = cache.key(Segment::Trunk, 1);
        let k2 = cache.key(Segment::Trunk, 2);
        let k3 = cache.key(Segment::Trunk, 3);
        cache.insert(k1, dummy(Segment::Trunk));
        cache.insert(k2, dummy(Segment::Trunk));
        cache.insert(k3, dummy(Segment::Trunk));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&k1).is_none());
        assert!(cache.get(&k3).is_some());
    }

    #[test]
    fn test_builder_reuses_cached_frame() {
        let cache = FrameCache::new(&cache_config(1, 1000, 8), Arc::new(ManualClock::new(0)));
        let mut builder = FrameBuilder::new(cache, 0.3, 1e-6);
        let mut f = LandmarkFrame::new(Schema::MoveNet17, 40);
        f.insert(JointName::LeftShoulder, Landmark::new(0.6, 0.25, 0.0, 1.0));
        f.insert(JointName::RightShoulder, Landmark::new(0.4, 0.25, 0.0, 1.0));
        f.insert(JointName::LeftHip, Landmark::new(0.57, 0.55, 0.0, 1.0));
        f.insert(JointName::RightHip, Landmark::new(0.43, 0.55, 0.0, 1.0));
        let a = builder.frame(Segment::Trunk, &f);
        let b = builder.frame(Segment::Trunk, &f);
        assert!(a.valid);
        assert_eq!(a, b);
        assert_eq!(builder.cache().stats(), (1, 1));
    }
}
