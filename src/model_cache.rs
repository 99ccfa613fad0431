use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Get-or-load cache for loaded models, owned by the application root and
/// shared with whoever needs a model. Entries live until the cache is
/// dropped; models are immutable once loaded.
pub struct ModelCache<K, V> {
    entries: Mutex<HashMap<K, Arc<V>>>,
}

impl<K: Eq + Hash + Clone, V> ModelCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, loading it on first use. A failed
    /// load caches nothing. Loads run under the lock, so two callers never
    /// load the same model twice.
    pub fn get_or_load<E>(
        &self,
        key: &K,
        load: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(hit) = entries.get(key) {
            return Ok(Arc::clone(hit));
        }
        let value = Arc::new(load(key)?);
        entries.insert(key.clone(), Arc::clone(&value));
        Ok(value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl<K: Eq + Hash + Clone, V> Default for ModelCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn loads_once_per_key() {
        let cache: ModelCache<(String, String), String> = ModelCache::new();
        let loads = AtomicUsize::new(0);
        let key = ("base".to_string(), "cpu".to_string());
        for _ in 0..3 {
            let v = cache
                .get_or_load(&key, |(name, device)| {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(format!("{name}@{device}"))
                })
                .unwrap();
            assert_eq!(*v, "base@cpu");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_load_is_not_cached() {
        let cache: ModelCache<&str, u32> = ModelCache::new();
        assert!(cache.get_or_load(&"large", |_| Err("out of memory")).is_err());
        assert!(!cache.contains(&"large"));
        assert_eq!(*cache.get_or_load(&"large", |_| Ok::<_, &str>(7)).unwrap(), 7);
    }

    #[test]
    fn shared_across_threads() {
        let cache: Arc<ModelCache<u8, u8>> = Arc::new(ModelCache::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                thread::spawn(move || {
                    *cache
                        .get_or_load(&1, |_| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, ()>(9)
                        })
                        .unwrap()
                })
            })
            .collect();
        for w in workers {
            assert_eq!(w.join().unwrap(), 9);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
