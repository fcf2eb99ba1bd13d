//! The peer registry: a concurrent, TTL-evicted store of `(host, file)`
//! records, indexed by hash for the dedup-by-hash queries the protocol
//! needs and scanned for every other access pattern (§4.1).
//!
//! Storage is one `IndexMap<hash, Vec<FileRecord>>` behind a single
//! `parking_lot::RwLock`, mirroring the teacher's `AHashIndexMap`-backed
//! torrent maps: an index map preserves insertion order, which gives
//! "first occurrence wins" hash deduplication (I4) for free during
//! iteration instead of needing a second ordering structure.

use std::net::Ipv4Addr;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::common::{now_secs, FileRecord, Host};
use crate::error::CapacityError;
use peer_tracker_protocol::FilterOp;

struct Inner {
    by_hash: IndexMap<String, Vec<FileRecord>>,
    total: usize,
}

impl Inner {
    fn iter_all(&self) -> impl Iterator<Item = &FileRecord> {
        self.by_hash.values().flatten()
    }
}

/// The shared registry. Cloning a `Registry` is cheap (it's an `Arc`-free
/// handle around the lock; callers are expected to wrap it in an `Arc`
/// themselves when handing it to worker threads, matching how the
/// dispatcher hands out its other shared state).
pub struct Registry {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner {
                by_hash: IndexMap::new(),
                total: 0,
            }),
        }
    }

    /// Insert `record` unless an equal (field-wise, I1) record already
    /// exists. Fails with `CapacityError` once `capacity` records are
    /// stored; the caller is expected to log this at WARNING (§4.1).
    ///
    /// A tombstone (`size == 0`) is "considered absent" (§3) and is never
    /// stored; this is a no-op, not an error.
    pub fn store(&self, record: FileRecord) -> Result<(), CapacityError> {
        if record.is_tombstone() {
            return Ok(());
        }

        let mut inner = self.inner.write();

        if let Some(bucket) = inner.by_hash.get(&record.hash) {
            if bucket.iter().any(|r| r == &record) {
                return Ok(());
            }
        }

        if inner.total >= self.capacity {
            return Err(CapacityError {
                capacity: self.capacity,
            });
        }

        inner.by_hash.entry(record.hash.clone()).or_default().push(record);
        inner.total += 1;

        Ok(())
    }

    /// Count of non-tombstone (`size != 0`) records currently stored.
    pub fn get_size(&self) -> usize {
        self.inner
            .read()
            .iter_all()
            .filter(|r| !r.is_tombstone())
            .count()
    }

    /// A consistent point-in-time copy of every stored record.
    pub fn load_all(&self) -> Vec<FileRecord> {
        self.inner.read().iter_all().cloned().collect()
    }

    pub fn load_by_hash(&self, hash: &str) -> Vec<FileRecord> {
        self.inner
            .read()
            .by_hash
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }

    pub fn load_by_host(&self, host: &Host) -> Vec<FileRecord> {
        self.inner
            .read()
            .iter_all()
            .filter(|r| &r.host == host)
            .cloned()
            .collect()
    }

    /// Distinct hosts whose IP matches `ip`. Two records sharing a host
    /// always carry the same `last_seen` (maintained by `touch`), so
    /// deduplicating on `(ip, port)` is equivalent to the spec's
    /// "(ip,port,last_seen) tuples" wording (P5).
    pub fn load_by_ip(&self, ip: Ipv4Addr) -> Vec<Host> {
        let mut seen = std::collections::HashSet::new();
        let mut hosts = Vec::new();

        for record in self.inner.read().iter_all() {
            if record.host.ip != ip {
                continue;
            }
            if seen.insert((record.host.ip, record.host.port)) {
                hosts.push(record.host);
            }
        }

        hosts
    }

    pub fn load_by_filename(&self, filename: &str) -> Vec<FileRecord> {
        self.inner
            .read()
            .iter_all()
            .filter(|r| r.filename == filename)
            .cloned()
            .collect()
    }

    /// Remove every record owned by `host`. Returns whether anything was
    /// removed.
    pub fn remove_host(&self, host: &Host) -> bool {
        let mut inner = self.inner.write();
        let mut removed = false;

        inner.by_hash.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|r| &r.host != host);
            removed |= bucket.len() != before;
            !bucket.is_empty()
        });

        if removed {
            inner.total = inner.by_hash.values().map(Vec::len).sum();
        }

        removed
    }

    pub fn remove_file(&self, filename: &str) -> bool {
        let mut inner = self.inner.write();
        let mut removed = false;

        inner.by_hash.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|r| r.filename != filename);
            removed |= bucket.len() != before;
            !bucket.is_empty()
        });

        if removed {
            inner.total = inner.by_hash.values().map(Vec::len).sum();
        }

        removed
    }

    pub fn remove_hash(&self, hash: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.by_hash.shift_remove(hash) {
            Some(bucket) => {
                inner.total -= bucket.len();
                true
            }
            None => false,
        }
    }

    /// §4.1 `filter`: records matching `filename` (ignored when empty) and
    /// `size op argument` (ignored when `size == 0`, regardless of `op`),
    /// deduplicated by hash with the first matching occurrence (in storage
    /// order) winning.
    pub fn filter(&self, filename: &str, size: i64, op: FilterOp) -> Vec<FileRecord> {
        let inner = self.inner.read();
        let mut out = Vec::new();

        for (hash, bucket) in inner.by_hash.iter() {
            let Some(record) = bucket.iter().find(|r| {
                let name_ok = filename.is_empty() || r.filename == filename;
                let size_ok = size == 0
                    || match op {
                        FilterOp::None => true,
                        FilterOp::Eq => r.size == size,
                        FilterOp::Lt => r.size < size,
                        FilterOp::Gt => r.size > size,
                    };
                name_ok && size_ok
            }) else {
                continue;
            };

            debug_assert_eq!(&record.hash, hash);
            out.push(record.clone());
        }

        out
    }

    /// Drop every record owned by a host whose `last_seen` has aged past
    /// `ttl_seconds`, as of `now`. Hosts with `last_seen == 0` (never
    /// touched) are never expired (I3).
    pub fn expire(&self, ttl_seconds: u64, now: u64) {
        let mut inner = self.inner.write();
        let mut removed_any = false;

        inner.by_hash.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|r| {
                r.host.last_seen == 0 || now.saturating_sub(r.host.last_seen) <= ttl_seconds
            });
            removed_any |= bucket.len() != before;
            !bucket.is_empty()
        });

        if removed_any {
            inner.total = inner.by_hash.values().map(Vec::len).sum();
        }
    }

    /// Advance `last_seen` to `now` for every record owned by `host`
    /// (I2: never decreases within an active session, so callers always
    /// pass the current timestamp).
    pub fn touch(&self, host: &Host, now: u64) {
        let mut inner = self.inner.write();
        for record in inner.by_hash.values_mut().flatten() {
            if &record.host == host {
                record.host.last_seen = now;
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(crate::config::RegistryConfig::default().capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ip: [u8; 4], port: u16, hash: &str, filename: &str, size: i64) -> FileRecord {
        FileRecord {
            host: Host::new(Ipv4Addr::from(ip), port, now_secs()),
            size,
            chunk_size: 16,
            hash: hash.to_string(),
            filename: filename.to_string(),
        }
    }

    #[test]
    fn store_is_idempotent_under_full_equality() {
        let reg = Registry::new(64);
        let r = record([1, 2, 3, 4], 4444, "abc", "file.dat", 128);

        reg.store(r.clone()).unwrap();
        reg.store(r.clone()).unwrap();

        assert_eq!(reg.get_size(), 1);
        assert_eq!(reg.load_by_hash("abc").len(), 1);
    }

    #[test]
    fn store_fails_when_capacity_reached() {
        let reg = Registry::new(1);
        reg.store(record([1, 2, 3, 4], 1, "h1", "a.dat", 1)).unwrap();

        let err = reg
            .store(record([1, 2, 3, 4], 2, "h2", "b.dat", 1))
            .unwrap_err();
        assert_eq!(err.capacity, 1);
    }

    #[test]
    fn store_rejects_tombstone_record() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 4444, "abc", "file.dat", 0))
            .unwrap();

        assert_eq!(reg.get_size(), 0);
        assert!(reg.load_by_hash("abc").is_empty());
    }

    #[test]
    fn store_does_not_leave_phantom_bucket_on_capacity_failure() {
        let reg = Registry::new(1);
        reg.store(record([1, 2, 3, 4], 1, "h1", "a.dat", 1)).unwrap();

        let err = reg
            .store(record([5, 6, 7, 8], 2, "h2", "b.dat", 1))
            .unwrap_err();
        assert_eq!(err.capacity, 1);

        // "h2" was never actually inserted, so there's nothing to remove.
        assert!(!reg.remove_hash("h2"));
    }

    #[test]
    fn load_by_host_ignores_last_seen() {
        let reg = Registry::new(64);
        let r = record([1, 2, 3, 4], 4444, "abc", "file.dat", 128);
        reg.store(r.clone()).unwrap();

        let probe = Host::new(Ipv4Addr::new(1, 2, 3, 4), 4444, 0);
        assert_eq!(reg.load_by_host(&probe).len(), 1);
    }

    #[test]
    fn load_by_ip_dedupes_hosts() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 1111, "h1", "a.dat", 1))
            .unwrap();
        reg.store(record([1, 2, 3, 4], 1111, "h2", "b.dat", 1))
            .unwrap();
        reg.store(record([1, 2, 3, 4], 2222, "h3", "c.dat", 1))
            .unwrap();

        let hosts = reg.load_by_ip(Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(hosts.len(), 2);
    }

    #[test]
    fn remove_host_drops_all_its_records() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 1111, "h1", "a.dat", 1))
            .unwrap();
        reg.store(record([1, 2, 3, 4], 1111, "h2", "b.dat", 1))
            .unwrap();

        let host = Host::new(Ipv4Addr::new(1, 2, 3, 4), 1111, 0);
        assert!(reg.remove_host(&host));
        assert_eq!(reg.get_size(), 0);
        assert!(!reg.remove_host(&host));
    }

    #[test]
    fn filter_matches_all_when_unset() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 1111, "h1", "a.dat", 1))
            .unwrap();
        reg.store(record([5, 6, 7, 8], 2222, "h2", "b.dat", 2))
            .unwrap();

        assert_eq!(reg.filter("", 0, FilterOp::None).len(), 2);
    }

    #[test]
    fn filter_dedups_by_hash() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 1111, "abc", "file.dat", 128))
            .unwrap();
        reg.store(record([5, 6, 7, 8], 2222, "abc", "file.dat", 128))
            .unwrap();

        let out = reg.filter("", 128, FilterOp::Eq);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn filter_by_filename_and_size_comparison() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 1111, "h1", "a.dat", 100))
            .unwrap();
        reg.store(record([1, 2, 3, 4], 2222, "h2", "a.dat", 200))
            .unwrap();

        let out = reg.filter("a.dat", 150, FilterOp::Gt);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hash, "h2");
    }

    #[test]
    fn filter_size_zero_matches_all_regardless_of_op() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 1111, "h1", "a.dat", 100))
            .unwrap();
        reg.store(record([5, 6, 7, 8], 2222, "h2", "b.dat", 200))
            .unwrap();

        assert_eq!(reg.filter("", 0, FilterOp::Eq).len(), 2);
        assert_eq!(reg.filter("", 0, FilterOp::Lt).len(), 2);
        assert_eq!(reg.filter("", 0, FilterOp::Gt).len(), 2);
    }

    #[test]
    fn expire_drops_stale_hosts_but_not_fresh_or_never_touched() {
        let reg = Registry::new(64);
        let mut stale = record([1, 2, 3, 4], 1111, "h1", "a.dat", 1);
        stale.host.last_seen = 100;
        reg.store(stale).unwrap();

        let mut fresh = record([5, 6, 7, 8], 2222, "h2", "b.dat", 1);
        fresh.host.last_seen = 190;
        reg.store(fresh).unwrap();

        let mut untouched = record([9, 9, 9, 9], 3333, "h3", "c.dat", 1);
        untouched.host.last_seen = 0;
        reg.store(untouched).unwrap();

        reg.expire(60, 200);

        assert_eq!(reg.get_size(), 2);
        assert!(reg
            .load_by_host(&Host::new(Ipv4Addr::new(1, 2, 3, 4), 1111, 0))
            .is_empty());
        assert!(!reg
            .load_by_host(&Host::new(Ipv4Addr::new(5, 6, 7, 8), 2222, 0))
            .is_empty());
        assert!(!reg
            .load_by_host(&Host::new(Ipv4Addr::new(9, 9, 9, 9), 3333, 0))
            .is_empty());
    }

    #[test]
    fn touch_advances_last_seen_for_every_record_of_a_host() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 1111, "h1", "a.dat", 1))
            .unwrap();
        reg.store(record([1, 2, 3, 4], 1111, "h2", "b.dat", 1))
            .unwrap();

        let host = Host::new(Ipv4Addr::new(1, 2, 3, 4), 1111, 0);
        reg.touch(&host, 555);

        for r in reg.load_by_host(&host) {
            assert_eq!(r.host.last_seen, 555);
        }
    }

    #[test]
    fn remove_hash_removes_whole_bucket() {
        let reg = Registry::new(64);
        reg.store(record([1, 2, 3, 4], 1111, "h1", "a.dat", 1))
            .unwrap();
        assert!(reg.remove_hash("h1"));
        assert!(reg.load_by_hash("h1").is_empty());
        assert!(!reg.remove_hash("h1"));
    }

    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn get_size_tracks_non_tombstone_cardinality(ops: Vec<(u8, u8, i64)>) -> bool {
        let reg = Registry::new(4096);
        let mut model: std::collections::HashSet<(u8, u8, i64)> = std::collections::HashSet::new();

        for (ip_last_octet, port_low, size) in ops {
            if size == 0 {
                continue;
            }
            let key = (ip_last_octet, port_low, size);
            model.insert(key);
            let _ = reg.store(record(
                [1, 2, 3, ip_last_octet],
                1000 + port_low as u16,
                &format!("h{ip_last_octet}-{port_low}-{size}"),
                "f.dat",
                size,
            ));
        }

        reg.get_size() == model.len()
    }
}
