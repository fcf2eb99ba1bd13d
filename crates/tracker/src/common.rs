//! Core value types shared across the registry, processor, and dispatcher.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

/// A peer's externally reachable identity: IP and **listening** port, not
/// its ephemeral TCP source port.
#[derive(Clone, Copy, Debug)]
pub struct Host {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub last_seen: u64,
}

impl Host {
    pub fn new(ip: Ipv4Addr, port: u16, now: u64) -> Self {
        Self {
            ip,
            port,
            last_seen: now,
        }
    }
}

/// Identity equality: ip and port only. `last_seen` is not part of identity
/// (§3 of the spec this crate implements).
impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for Host {}

/// One advertised piece of content, owned by a [`Host`].
///
/// `size == 0` is the tombstone value: such a record is considered absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub host: Host,
    pub size: i64,
    pub chunk_size: i32,
    pub hash: String,
    pub filename: String,
}

impl FileRecord {
    pub fn is_tombstone(&self) -> bool {
        self.size == 0
    }
}

/// Field-wise equality for [`Host`] ignores `last_seen`, but [`FileRecord`]'s
/// derived `PartialEq` needs `Host`'s `PartialEq` to behave that way for the
/// whole-record comparison the registry performs on `store` (I1). We give
/// `Host` a manual impl above rather than deriving it, since the derive
/// would include `last_seen`.
const _: () = {
    fn assert_host_partial_eq_excludes_last_seen() {
        let a = Host::new(Ipv4Addr::new(1, 2, 3, 4), 1, 0);
        let b = Host::new(Ipv4Addr::new(1, 2, 3, 4), 1, 999);
        assert!(a.ip == b.ip && a.port == b.port);
    }
    let _ = assert_host_partial_eq_excludes_last_seen;
};

/// Current Unix timestamp in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}
