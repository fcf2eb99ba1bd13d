//! Per-connection request handling (§4.3): resolve the caller's host,
//! dispatch to the verb the parser recognized, and write one reply line.
//! One connection carries exactly one request and one response — there is
//! no keep-alive.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use parking_lot::RwLock;

use peer_tracker_protocol::{request, response, Command, FilterOp, ListEntry};

use crate::common::{now_secs, FileRecord, Host};
use crate::error::CapacityError;
use crate::net;
use crate::registry::Registry;

/// Bytes read per `recv` attempt (§4.3 step 1).
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// The tracker's idea of its own address, learned lazily: `local_ip` the
/// first time any connection's local socket address is inspected,
/// `public_ip` from the startup probe (§4.5) or, failing that, copied
/// from `local_ip` on first use (§4.3 step 2).
pub struct TrackerAddresses {
    local_ip: RwLock<Option<Ipv4Addr>>,
    public_ip: RwLock<Option<Ipv4Addr>>,
}

impl TrackerAddresses {
    pub fn new(probed_public_ip: Option<Ipv4Addr>) -> Self {
        Self {
            local_ip: RwLock::new(None),
            public_ip: RwLock::new(probed_public_ip),
        }
    }

    fn observe(&self, stream: &TcpStream) {
        if self.local_ip.read().is_some() {
            return;
        }

        let Some(ip) = net::local_ip_of(stream) else {
            return;
        };

        *self.local_ip.write() = Some(ip);

        let mut public = self.public_ip.write();
        if public.is_none() {
            *public = Some(ip);
        }
    }

    pub fn public_ip(&self) -> Option<Ipv4Addr> {
        *self.public_ip.read()
    }
}

/// What the dispatcher should do with a connection after one processor
/// pass over it.
pub enum Outcome {
    /// A reply was written (or writing failed after a hang-up); the
    /// connection is done.
    Done,
    /// `recv` had nothing ready; re-enqueue for a later pass (§4.3, §7
    /// `TransientIOError`).
    Retry,
}

/// Run one processor pass over `stream`. Probes for the tracker's own
/// local address if it hasn't been observed yet, resolves the caller's
/// `Host`, runs TTL housekeeping, parses and dispatches the request, and
/// writes the reply.
pub fn process(
    stream: &mut TcpStream,
    registry: &Registry,
    addrs: &TrackerAddresses,
    ttl_seconds: u64,
) -> Outcome {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Outcome::Retry,
        Err(e) => {
            log::warn!("recv failed, dropping connection: {e}");
            return Outcome::Done;
        }
    };

    addrs.observe(stream);

    let Some(SocketAddr::V4(peer_addr)) = net::peer_addr_of(stream) else {
        let _ = stream.write_all(response::WRONG_REQUEST.as_bytes());
        return Outcome::Done;
    };

    let now = now_secs();

    // §4.3 step 3: if this IP is already known under exactly one distinct
    // listening port, that port overrides the connection's ephemeral
    // transport port for identity.
    let known = registry.load_by_ip(*peer_addr.ip());
    let port = match known.as_slice() {
        [single] => single.port,
        _ => peer_addr.port(),
    };

    let host = Host::new(*peer_addr.ip(), port, now);

    registry.expire(ttl_seconds, now);
    registry.touch(&host, now);

    let line = String::from_utf8_lossy(&buf[..n]);
    log::debug!("request from {}:{}: {:?}", host.ip, host.port, line.trim_end());

    let (reply, capacity_err) = match request::parse(&line) {
        Ok(cmd) => dispatch(cmd, host, registry, addrs),
        Err(e) => {
            log::debug!("protocol error from {}:{}: {e}", host.ip, host.port);
            (response::WRONG_REQUEST.to_string(), None)
        }
    };

    if let Some(CapacityError { capacity }) = capacity_err {
        log::warn!("registry at capacity ({capacity}); one or more records were dropped");
    }

    let _ = stream.write_all(reply.as_bytes());
    Outcome::Done
}

fn dispatch(
    cmd: Command,
    host: Host,
    registry: &Registry,
    addrs: &TrackerAddresses,
) -> (String, Option<CapacityError>) {
    match cmd {
        Command::Announce {
            port,
            seeds,
            leeches,
            truncated,
        } => announce(host, port, seeds, leeches, truncated, registry),
        Command::Update {
            seeds,
            leeches,
            truncated,
        } => update(host, seeds, leeches, truncated, registry),
        Command::GetFile { hash } => (getfile(host, &hash, registry, addrs), None),
        Command::Look { filename, filesize } => (look(filename, filesize, registry), None),
    }
}

fn announce(
    host: Host,
    port: u16,
    seeds: Vec<peer_tracker_protocol::AnnouncedSeed>,
    leeches: Vec<String>,
    truncated: bool,
    registry: &Registry,
) -> (String, Option<CapacityError>) {
    if truncated {
        log::debug!("announce from {}: seed/leech list truncated", host.ip);
    }

    let announced_host = Host::new(host.ip, port, host.last_seen);
    let mut capacity_err = None;

    for seed in seeds {
        let record = FileRecord {
            host: announced_host,
            size: seed.size,
            chunk_size: seed.chunk_size,
            hash: seed.hash,
            filename: seed.filename,
        };
        if let Err(e) = registry.store(record) {
            capacity_err.get_or_insert(e);
        }
    }

    for hash in leeches {
        let source = registry
            .load_by_hash(&hash)
            .into_iter()
            .find(|r| r.host != announced_host);

        if let Some(source) = source {
            let record = FileRecord {
                host: announced_host,
                size: source.size,
                chunk_size: source.chunk_size,
                hash,
                filename: source.filename,
            };
            if let Err(e) = registry.store(record) {
                capacity_err.get_or_insert(e);
            }
        }
    }

    (response::OK.to_string(), capacity_err)
}

fn update(
    host: Host,
    seeds: Vec<String>,
    leeches: Vec<String>,
    truncated: bool,
    registry: &Registry,
) -> (String, Option<CapacityError>) {
    if truncated {
        log::debug!("update from {}: seed/leech list truncated", host.ip);
    }

    registry.remove_host(&host);

    let mut capacity_err = None;

    for hash in seeds.into_iter().chain(leeches) {
        let source = registry
            .load_by_hash(&hash)
            .into_iter()
            .find(|r| r.host != host);

        if let Some(source) = source {
            let record = FileRecord {
                host,
                size: source.size,
                chunk_size: source.chunk_size,
                hash,
                filename: source.filename,
            };
            if let Err(e) = registry.store(record) {
                capacity_err.get_or_insert(e);
            }
        }
    }

    (response::OK.to_string(), capacity_err)
}

fn getfile(host: Host, hash: &str, registry: &Registry, addrs: &TrackerAddresses) -> String {
    let caller_is_public = !net::is_private_ipv4(host.ip);

    let peers: Vec<(Ipv4Addr, u16)> = registry
        .load_by_hash(hash)
        .into_iter()
        .map(|record| {
            let mut ip = record.host.ip;

            if caller_is_public && net::is_private_ipv4(ip) {
                if let Some(public_ip) = addrs.public_ip() {
                    log::warn!(
                        "getfile {hash}: rewriting private peer {ip} to public {public_ip} for caller {}",
                        host.ip
                    );
                    ip = public_ip;
                }
            }

            (ip, record.host.port)
        })
        .collect();

    response::format_peers(hash, &peers)
}

fn look(
    filename: Option<String>,
    filesize: Option<(FilterOp, i64)>,
    registry: &Registry,
) -> String {
    let filename = filename.unwrap_or_default();
    let (op, size) = filesize.unwrap_or((FilterOp::None, 0));

    let entries: Vec<ListEntry> = registry
        .filter(&filename, size, op)
        .into_iter()
        .map(|r| ListEntry {
            filename: r.filename,
            size: r.size,
            chunk_size: r.chunk_size,
            hash: r.hash,
        })
        .collect();

    response::format_list(&entries)
}

/// Startup probe: fetch the public IP once, off the hot path (§4.5, §6).
/// Failure is logged at WARNING and leaves the tracker in local-only mode.
pub fn probe_public_ip(timeout: Duration) -> Option<Ipv4Addr> {
    match net::fetch_public_ip(timeout) {
        Some(ip) => Some(ip),
        None => {
            log::warn!("public IP probe failed; running in local-only mode");
            None
        }
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
    fn scenario_s1_announce_then_getfile_from_another_peer() {
        let registry = Registry::new(64);
        let addrs = TrackerAddresses::new(None);

        let announcer = Host::new(Ipv4Addr::new(1, 2, 3, 4), 50000, now_secs());
        let cmd = request::parse("announce listen 4444 seed [file.dat 128 16 abc]\n").unwrap();
        let (reply, err) = dispatch(cmd, announcer, &registry, &addrs);
        assert!(err.is_none());
        assert_eq!(reply, "ok\n");

        let asker = Host::new(Ipv4Addr::new(5, 6, 7, 8), 60000, now_secs());
        let cmd = request::parse("getfile abc\n").unwrap();
        let (reply, _) = dispatch(cmd, asker, &registry, &addrs);
        assert_eq!(reply, "peers abc [1.2.3.4:4444]\n");
    }

    #[test]
    fn scenario_s2_look_by_filename() {
        let registry = Registry::new(64);
        let addrs = TrackerAddresses::new(None);
        registry
            .store(record([1, 2, 3, 4], 4444, "abc", "file.dat", 128))
            .unwrap();

        let host = Host::new(Ipv4Addr::new(1, 2, 3, 4), 4444, now_secs());
        let cmd = request::parse("look [filename='file.dat']\n").unwrap();
        let (reply, _) = dispatch(cmd, host, &registry, &addrs);
        assert_eq!(reply, "list [file.dat 128 16 abc]\n");
    }

    #[test]
    fn scenario_s3_look_by_filesize_dedupes_by_hash() {
        let registry = Registry::new(64);
        let addrs = TrackerAddresses::new(None);
        registry
            .store(record([1, 2, 3, 4], 1111, "abc", "file.dat", 128))
            .unwrap();
        registry
            .store(record([5, 6, 7, 8], 2222, "abc", "file.dat", 128))
            .unwrap();

        let host = Host::new(Ipv4Addr::new(9, 9, 9, 9), 9999, now_secs());
        let cmd = request::parse("look [filesize='128']\n").unwrap();
        let (reply, _) = dispatch(cmd, host, &registry, &addrs);
        assert_eq!(reply, "list [file.dat 128 16 abc]\n");
    }

    #[test]
    fn scenario_s4_update_rehoams_existing_hash() {
        let registry = Registry::new(64);
        let addrs = TrackerAddresses::new(None);
        registry
            .store(record([1, 2, 3, 4], 1111, "abc", "file.dat", 128))
            .unwrap();

        let new_host = Host::new(Ipv4Addr::new(5, 6, 7, 8), 2222, now_secs());
        let cmd = request::parse("update seed [abc]\n").unwrap();
        let (reply, _) = dispatch(cmd, new_host, &registry, &addrs);
        assert_eq!(reply, "ok\n");

        let records = registry.load_by_hash("abc");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].host, new_host);
        assert_eq!(records[0].filename, "file.dat");
        assert_eq!(records[0].size, 128);
    }

    #[test]
    fn scenario_s7_update_seed_empty_removes_host_records() {
        let registry = Registry::new(64);
        let addrs = TrackerAddresses::new(None);
        let host = Host::new(Ipv4Addr::new(1, 2, 3, 4), 1111, now_secs());
        registry
            .store(record([1, 2, 3, 4], 1111, "abc", "file.dat", 128))
            .unwrap();

        let before = registry.get_size();
        let cmd = request::parse("update seed []\n").unwrap();
        let (reply, _) = dispatch(cmd, host, &registry, &addrs);
        assert_eq!(reply, "ok\n");
        assert!(registry.get_size() <= before);
        assert!(registry.load_by_host(&host).is_empty());
    }

    #[test]
    fn getfile_rewrites_private_peer_for_public_caller() {
        let registry = Registry::new(64);
        let addrs = TrackerAddresses::new(Some(Ipv4Addr::new(203, 0, 113, 9)));
        registry
            .store(record([192, 168, 1, 5], 4444, "abc", "file.dat", 128))
            .unwrap();

        let caller = Host::new(Ipv4Addr::new(8, 8, 8, 8), 1, now_secs());
        let reply = getfile(caller, "abc", &registry, &addrs);
        assert_eq!(reply, "peers abc [203.0.113.9:4444]\n");
    }

    #[test]
    fn getfile_leaves_private_to_private_unchanged() {
        let registry = Registry::new(64);
        let addrs = TrackerAddresses::new(Some(Ipv4Addr::new(203, 0, 113, 9)));
        registry
            .store(record([192, 168, 1, 5], 4444, "abc", "file.dat", 128))
            .unwrap();

        let caller = Host::new(Ipv4Addr::new(192, 168, 1, 9), 1, now_secs());
        let reply = getfile(caller, "abc", &registry, &addrs);
        assert_eq!(reply, "peers abc [192.168.1.5:4444]\n");
    }

    #[test]
    fn getfile_never_surfaces_a_tombstone_seed() {
        let registry = Registry::new(64);
        let addrs = TrackerAddresses::new(None);

        let announcer = Host::new(Ipv4Addr::new(1, 2, 3, 4), 50000, now_secs());
        let cmd = request::parse("announce listen 4444 seed [file.dat 0 16 abc]\n").unwrap();
        let (reply, _) = dispatch(cmd, announcer, &registry, &addrs);
        assert_eq!(reply, "ok\n");

        let asker = Host::new(Ipv4Addr::new(5, 6, 7, 8), 60000, now_secs());
        let cmd = request::parse("getfile abc\n").unwrap();
        let (reply, _) = dispatch(cmd, asker, &registry, &addrs);
        assert_eq!(reply, "peers abc []\n");
    }

    #[test]
    fn malformed_request_yields_wrong_request() {
        assert!(request::parse("hello world\n").is_err());
    }
}
