//! Load-once caching of read-only documents.
//!
//! Rule files and `$(path.jsonc:key)` expression references read shared
//! assets. The cache interns them by canonical path so each file is loaded
//! and parsed once, and evicts entries that have sat unreferenced for a few
//! frames.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use ahash::AHashMap;

use super::{Document, NumCell};
use crate::{error::DocError, resource};

/// Frames an entry must stay unreferenced before it may be evicted.
pub const EVICT_AFTER_FRAMES: u32 = 120;

/// An immutable document loaded through the cache.
///
/// Holds the parsed contents and the canonical path it was loaded from.
/// Expression compilation binds stable cells from it exactly like from a
/// mutable document; nothing writes to it after load.
pub struct ReadOnlyDoc {
    path: PathBuf,
    doc: Document,
}

impl ReadOnlyDoc {
    /// The canonical path this document was loaded from.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read access to the parsed contents.
    #[must_use]
    pub fn doc(&self) -> &Document {
        &self.doc
    }

    /// Stable cell for a numeric key, for expression binding.
    pub fn stable_double(&self, key: &str) -> Result<Arc<NumCell>, DocError> {
        self.doc.stable_double(key)
    }
}

struct CacheSlot {
    doc: Arc<ReadOnlyDoc>,
    /// Consecutive `update()` calls during which only the cache held the doc.
    idle_frames: u32,
}

/// Reference-counted, path-keyed store of read-only documents.
#[derive(Default)]
pub struct DocumentCache {
    slots: Mutex<AHashMap<PathBuf, CacheSlot>>,
}

impl DocumentCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached document for `path`, loading it on first use.
    ///
    /// Accepts JSON and JSONC files; comments are stripped before parsing.
    pub fn read_doc(&self, path: &str) -> Result<Arc<ReadOnlyDoc>, DocError> {
        let canonical = resource::resolve(path);
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(&canonical) {
            slot.idle_frames = 0;
            return Ok(Arc::clone(&slot.doc));
        }
        let text = std::fs::read_to_string(&canonical)
            .map_err(|err| DocError::Malformed(format!("{}: {err}", canonical.display())))?;
        let doc = Document::from_text(&text)?;
        let entry = Arc::new(ReadOnlyDoc {
            path: canonical.clone(),
            doc,
        });
        slots.insert(
            canonical,
            CacheSlot {
                doc: Arc::clone(&entry),
                idle_frames: 0,
            },
        );
        Ok(entry)
    }

    /// Per-frame maintenance: ages unreferenced entries and evicts the stale.
    ///
    /// An entry is unreferenced when the cache holds the only `Arc`; it is
    /// evicted after [`EVICT_AFTER_FRAMES`] consecutive unreferenced frames.
    pub fn update(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| {
            if Arc::strong_count(&slot.doc) > 1 {
                slot.idle_frames = 0;
                return true;
            }
            slot.idle_frames += 1;
            slot.idle_frames < EVICT_AFTER_FRAMES
        });
    }

    /// Number of currently cached documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> String {
        let dir = std::env::temp_dir().join("nebulite-cache-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn loads_once_and_shares() {
        let path = write_temp("shared.jsonc", "{ \"hp\": 10 } // comment");
        let cache = DocumentCache::new();
        let first = cache.read_doc(&path).unwrap();
        let second = cache.read_doc(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.doc().get("hp", 0i64), 10);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_after_idle_frames() {
        let path = write_temp("evict.json", "{ \"a\": 1 }");
        let cache = DocumentCache::new();
        {
            let _doc = cache.read_doc(&path).unwrap();
            cache.update();
            assert_eq!(cache.len(), 1);
        }
        for _ in 0..EVICT_AFTER_FRAMES {
            cache.update();
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        let cache = DocumentCache::new();
        assert!(cache.read_doc("/definitely/not/here.json").is_err());
    }
}
