//! [`DataKeyCache`]: TTL-bounded in-memory map of DEK id → raw DEK bytes.
//!
//! Backed by a single [`parking_lot::Mutex`] — the pack's idiom for short,
//! synchronous critical sections (see `AdamLassiter-sqlsec`,
//! `harborgrid-justin-rusty-db`) — since every operation here is pure
//! in-memory bookkeeping with no `.await` point. Entries carry their raw
//! bytes in a buffer that is zeroed on drop, the same defence-in-depth the
//! teacher's `DekBytes` applies to the single cached DEK.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Fixed-size buffer holding a raw DEK. Zeroed when dropped.
#[derive(Clone)]
pub struct DekBytes(pub Vec<u8>);

impl Drop for DekBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for DekBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DekBytes([REDACTED])")
    }
}

struct Entry {
    bytes: DekBytes,
    inserted_at: Instant,
}

/// Thread-safe, TTL-bounded cache of decrypted DEKs, keyed by DEK id.
///
/// Entries older than `ttl` are treated as absent by [`DataKeyCache::get`]
/// and are opportunistically dropped; [`DataKeyCache::remove_expired`] is
/// the bulk sweep `SecretsCore`'s background loop calls on a timer so the
/// hot path never pays an O(n) eviction cost.
pub struct DataKeyCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl DataKeyCache {
    /// Create a new cache with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or overwrite the entry for `id`, stamping the insertion time.
    pub fn add(&self, id: &str, raw_bytes: &[u8]) {
        self.entries.lock().insert(
            id.to_owned(),
            Entry {
                bytes: DekBytes(raw_bytes.to_vec()),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Return a clone of the cached bytes for `id` if present and unexpired.
    ///
    /// An expired entry found during the lookup is removed immediately.
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                Some(entry.bytes.0.clone())
            }
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    /// Drop every entry older than the configured TTL.
    pub fn remove_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .lock()
            .retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
    }

    /// Drop all entries unconditionally.
    pub fn flush(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries currently held, expired or not. Test/introspection only.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn add_then_get_round_trips() {
        let cache = DataKeyCache::new(Duration::from_secs(60));
        cache.add("k1", b"0123456789abcdef");
        assert_eq!(cache.get("k1").unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn missing_key_is_none() {
        let cache = DataKeyCache::new(Duration::from_secs(60));
        assert!(cache.get("nope").is_none());
    }

    #[test]
    fn expired_entry_is_absent_and_evicted() {
        let cache = DataKeyCache::new(Duration::from_millis(20));
        cache.add("k1", b"raw-dek-bytes-16");
        sleep(Duration::from_millis(40));
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.len(), 0, "expired get() should opportunistically evict");
    }

    #[test]
    fn remove_expired_sweeps_stale_entries_only() {
        let cache = DataKeyCache::new(Duration::from_millis(20));
        cache.add("stale", b"0000000000000000");
        sleep(Duration::from_millis(40));
        cache.add("fresh", b"1111111111111111");
        cache.remove_expired();
        assert!(cache.get("stale").is_none());
        assert!(cache.get("fresh").is_some());
    }

    #[test]
    fn flush_drops_everything() {
        let cache = DataKeyCache::new(Duration::from_secs(60));
        cache.add("k1", b"a");
        cache.add("k2", b"b");
        cache.flush();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn add_overwrites_existing_entry() {
        let cache = DataKeyCache::new(Duration::from_secs(60));
        cache.add("k1", b"first");
        cache.add("k1", b"second");
        assert_eq!(cache.get("k1").unwrap(), b"second");
    }

    #[test]
    fn dek_bytes_redacted_in_debug() {
        let dek = DekBytes(vec![0xFFu8; 16]);
        assert!(format!("{dek:?}").contains("REDACTED"));
    }
}
