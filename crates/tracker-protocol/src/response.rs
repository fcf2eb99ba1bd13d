//! Reply-line formatting.
//!
//! Every reply is a single line terminated by `\n`. Successful replies carry
//! payload-specific bodies; failures always collapse to [`WRONG_REQUEST`] so
//! a misbehaving peer can't distinguish "bad syntax" from "unknown hash" from
//! "capacity exceeded" by response shape alone.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use crate::common::ListEntry;

/// Reply sent for any request that failed to parse or could not be
/// satisfied.
pub const WRONG_REQUEST: &str = "Wrong request\n";

/// Reply sent for `announce` and `update` on success.
pub const OK: &str = "ok\n";

/// Render a `getfile` reply: `peers <hash> [<ip1>:<port1> <ip2>:<port2> ...]\n`.
///
/// An empty `peers` slice still renders as `peers <hash> []\n`.
pub fn format_peers(hash: &str, peers: &[(Ipv4Addr, u16)]) -> String {
    let mut out = format!("peers {hash} [");

    for (i, (ip, port)) in peers.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{ip}:{port}");
    }

    out.push_str("]\n");
    out
}

/// Render a `look` reply: `list [<filename> <size> <chunk> <hash> ...]\n`,
/// with each matching record's four fields flattened space-separated inside
/// the single bracket pair.
pub fn format_list(entries: &[ListEntry]) -> String {
    let mut out = String::from("list [");

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(
            out,
            "{} {} {} {}",
            entry.filename, entry.size, entry.chunk_size, entry.hash
        );
    }

    out.push_str("]\n");
    out
}
