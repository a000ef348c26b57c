//! C9 — KV store with TTL-based expiry, probabilistically swept.
//!
//! Grounded on `pymock/store.py`: `put`/`get`/`expires`/`flush_all` and the
//! sampling sweeper are a direct port. The one behavioral difference from
//! the original is deliberate (spec §9 Open Questions): `get` on a
//! never-expiring item (`expires_at: None`) always returns it, instead of
//! the Python version's `item.expires_at > time.time()` which would raise
//! on `None`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use rhai::Dynamic;

const SAMPLE_SIZE: usize = 20;
const SWEEP_EXPIRED_RATIO: f64 = 0.25;
const SWEEP_IDLE_DELAY: Duration = Duration::from_secs(300);

struct Item {
    value: Dynamic,
    expires_at: Option<Instant>,
}

impl Item {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

/// Process-wide key/value store exposed to handler scripts as `ctx.store`.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<HashMap<String, Item>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawns the background sweeper task on the current Tokio runtime.
    /// Call once, from the process's startup path.
    pub fn spawn_sweeper(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            store.sweep_loop().await;
        });
    }

    async fn sweep_loop(&self) {
        loop {
            let (sampled, expired) = self.sweep_once();
            if sampled > 0 && (expired as f64 / sampled as f64) > SWEEP_EXPIRED_RATIO {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::time::sleep(SWEEP_IDLE_DELAY).await;
        }
    }

    /// Samples up to [`SAMPLE_SIZE`] keys (or the whole map if smaller)
    /// and deletes the ones that have expired. Returns `(sampled, expired)`.
    fn sweep_once(&self) -> (usize, usize) {
        let now = Instant::now();
        let mut map = self.inner.lock();
        let keys: Vec<String> = if map.len() <= SAMPLE_SIZE {
            map.keys().cloned().collect()
        } else {
            map.keys()
                .cloned()
                .choose_multiple(&mut rand::thread_rng(), SAMPLE_SIZE)
        };
        let sampled = keys.len();
        let mut expired = 0;
        for key in keys {
            let dead = map.get(&key).map(|item| !item.is_live(now)).unwrap_or(false);
            if dead {
                map.remove(&key);
                expired += 1;
            }
        }
        (sampled, expired)
    }

    /// `put(key, value, expires=None)`. A zero or negative `expires` is a
    /// silent no-op; `None` never expires.
    pub fn put(&self, key: impl Into<String>, value: Dynamic, expires: Option<f64>) {
        if let Some(secs) = expires {
            if secs <= 0.0 {
                return;
            }
        }
        let expires_at = expires.map(|secs| Instant::now() + Duration::from_secs_f64(secs));
        self.inner.lock().insert(
            key.into(),
            Item {
                value,
                expires_at,
            },
        );
    }

    /// `get(key, default=None, expires=None)`. If present and unexpired,
    /// returns the value. Otherwise, if a default was supplied, inserts it
    /// (with `expires`) as a side effect and returns it; else returns
    /// `Dynamic::UNIT`.
    pub fn get(&self, key: &str, default: Option<Dynamic>, expires: Option<f64>) -> Dynamic {
        let now = Instant::now();
        {
            let map = self.inner.lock();
            if let Some(item) = map.get(key) {
                if item.is_live(now) {
                    return item.value.clone();
                }
            }
        }
        match default {
            Some(default) => {
                self.put(key.to_string(), default.clone(), expires);
                default
            }
            None => Dynamic::UNIT,
        }
    }

    /// `expires(key, ttl)`. Zero or negative deletes the key; otherwise
    /// updates its expiry (a missing key is a no-op either way).
    pub fn expires(&self, key: &str, ttl: Option<f64>) {
        let mut map = self.inner.lock();
        if let Some(secs) = ttl {
            if secs <= 0.0 {
                map.remove(key);
                return;
            }
        }
        if let Some(item) = map.get_mut(key) {
            item.expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs_f64(secs));
        }
    }

    pub fn flush_all(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let store = Store::new();
        store.put("k", Dynamic::from(42_i64), None);
        assert_eq!(store.get("k", None, None).as_int().unwrap(), 42);
    }

    #[test]
    fn put_with_nonpositive_expires_is_noop() {
        let store = Store::new();
        store.put("k", Dynamic::from(1_i64), Some(0.0));
        assert!(store.get("k", None, None).is_unit());
    }

    #[test]
    fn get_with_default_inserts_as_side_effect() {
        let store = Store::new();
        let v = store.get("k", Some(Dynamic::from("fallback")), None);
        assert_eq!(v.clone().into_string().unwrap(), "fallback");
        assert_eq!(
            store.get("k", None, None).into_string().unwrap(),
            "fallback"
        );
    }

    #[test]
    fn never_expiring_item_is_always_returned() {
        let store = Store::new();
        store.put("k", Dynamic::from(1_i64), None);
        // No expiry was set: the fixed behavior (spec §9) must keep
        // returning it, not treat `None` as already-expired.
        assert!(!store.get("k", None, None).is_unit());
    }

    #[test]
    fn expires_zero_deletes() {
        let store = Store::new();
        store.put("k", Dynamic::from(1_i64), Some(60.0));
        store.expires("k", Some(0.0));
        assert!(store.get("k", None, None).is_unit());
    }

    #[test]
    fn expired_item_is_absent_before_sweep_runs() {
        let store = Store::new();
        store.put("k", Dynamic::from(1_i64), Some(0.001));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get("k", None, None).is_unit());
    }
}
