use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct Entry<T> {
    loaded_at: Instant,
    value: Arc<T>,
}

/// Single-value cache that reloads after `ttl` or an explicit [`invalidate`].
///
/// The lock is held while loading, so concurrent readers of a stale entry
/// trigger one load and share its result. Failed loads are not cached.
///
/// [`invalidate`]: TimedCache::invalidate
#[derive(Debug)]
pub struct TimedCache<T> {
    ttl: Duration,
    slot: Mutex<Option<Entry<T>>>,
}

impl<T> TimedCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_try_load<E>(
        &self,
        load: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        self.get_or_try_load_at(Instant::now(), load)
    }

    /// [`get_or_try_load`](TimedCache::get_or_try_load) with an explicit clock.
    pub fn get_or_try_load_at<E>(
        &self,
        now: Instant,
        load: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        let mut slot = self.slot.lock();
        if let Some(entry) = slot.as_ref() {
            if now.saturating_duration_since(entry.loaded_at) < self.ttl {
                return Ok(entry.value.clone());
            }
        }
        let value = Arc::new(load()?);
        *slot = Some(Entry {
            loaded_at: now,
            value: value.clone(),
        });
        Ok(value)
    }

    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn reloads_after_ttl() {
        let cache = TimedCache::new(Duration::from_secs(60));
        let loads = Cell::new(0);
        let load = || -> Result<u32, ()> {
            loads.set(loads.get() + 1);
            Ok(loads.get())
        };
        let t0 = Instant::now();

        assert_eq!(*cache.get_or_try_load_at(t0, load).unwrap(), 1);
        assert_eq!(*cache.get_or_try_load_at(t0 + Duration::from_secs(59), load).unwrap(), 1);
        assert_eq!(*cache.get_or_try_load_at(t0 + Duration::from_secs(60), load).unwrap(), 2);
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn invalidate_forces_reload() {
        let cache = TimedCache::new(Duration::from_secs(3600));
        assert_eq!(*cache.get_or_try_load(|| Ok::<_, ()>("old")).unwrap(), "old");
        cache.invalidate();
        assert!(!cache.is_loaded());
        assert_eq!(*cache.get_or_try_load(|| Ok::<_, ()>("new")).unwrap(), "new");
    }

    #[test]
    fn errors_are_not_cached() {
        let cache: TimedCache<u8> = TimedCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_try_load(|| Err("disk")).unwrap_err(), "disk");
        assert!(!cache.is_loaded());
        assert_eq!(*cache.get_or_try_load(|| Ok::<_, &str>(7)).unwrap(), 7);
    }
}
