use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::audio::types::{TempoParameters, TimeWindow};
use crate::error::{ConfigError, Result};
use crate::session::AnalysisResult;

/// Identity of one analysis: file contents plus every setting that affects it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Hex MD5 of the file bytes
    pub file_digest: String,

    /// TOML rendering of sample rate, parameters and window
    pub settings: String,
}

#[derive(Serialize)]
struct KeySettings<'a> {
    sample_rate: u32,
    analysis: &'a TempoParameters,
    window: &'a TimeWindow,
}

impl CacheKey {
    pub fn new(
        file_bytes: &[u8],
        sample_rate: u32,
        params: &TempoParameters,
        window: &TimeWindow,
    ) -> Result<Self> {
        let settings = toml::to_string(&KeySettings {
            sample_rate,
            analysis: params,
            window,
        })
        .map_err(|e| ConfigError::InvalidValue {
            key: "cache_key".to_string(),
            value: e.to_string(),
        })?;

        Ok(Self {
            file_digest: format!("{:x}", md5::compute(file_bytes)),
            settings,
        })
    }
}

/// Store for finished analyses, injected into [`AnalysisSession`](crate::session::AnalysisSession)
pub trait AnalysisCache: Send + Sync {
    /// Return the cached result for `key`, running `compute` only if there is
    /// none. Failed computations are not cached.
    fn get_or_compute(
        &self,
        key: &CacheKey,
        compute: &mut dyn FnMut() -> Result<AnalysisResult>,
    ) -> Result<Arc<AnalysisResult>>;
}

type Slot = Arc<Mutex<Option<Arc<AnalysisResult>>>>;

/// Process-lifetime cache with one lock per key.
///
/// The map lock is only held to find or create a key's slot; the slot lock
/// is held for the whole computation, so concurrent requests for the same key
/// wait for the first one instead of recomputing, while other keys proceed.
#[derive(Default)]
pub struct InMemoryCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of finished results; waits for computations in progress
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached result
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        self.slots.lock().entry(key.clone()).or_default().clone()
    }

    /// Drop the slot of a failed computation unless it was already replaced
    fn forget(&self, key: &CacheKey, slot: &Slot) {
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }
}

impl AnalysisCache for InMemoryCache {
    fn get_or_compute(
        &self,
        key: &CacheKey,
        compute: &mut dyn FnMut() -> Result<AnalysisResult>,
    ) -> Result<Arc<AnalysisResult>> {
        let slot = self.slot(key);
        let mut entry = slot.lock();

        if let Some(result) = entry.as_ref() {
            debug!("Cache hit for {}", key.file_digest);
            return Ok(Arc::clone(result));
        }

        debug!("Cache miss for {}", key.file_digest);
        let result = match compute() {
            Ok(result) => Arc::new(result),
            Err(e) => {
                self.forget(key, &slot);
                return Err(e);
            }
        };
        *entry = Some(Arc::clone(&result));
        Ok(result)
    }
}

/// Cache that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl AnalysisCache for NoCache {
    fn get_or_compute(
        &self,
        _key: &CacheKey,
        compute: &mut dyn FnMut() -> Result<AnalysisResult>,
    ) -> Result<Arc<AnalysisResult>> {
        Ok(Arc::new(compute()?))
    }
}
