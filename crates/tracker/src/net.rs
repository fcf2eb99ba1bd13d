//! Socket construction and the two address-classification helpers the
//! processor needs: the public/private IP rewrite heuristic (§4.2
//! `getfile`) and the one-shot public-IP probe (§4.5, §6).
//!
//! Socket setup follows the same `socket2` recipe the teacher's listeners
//! use: build with `socket2::Socket` for the `SO_REUSEADDR`/non-blocking
//! knobs the standard library doesn't expose, then hand the fully
//! configured file descriptor over to `std::net::TcpListener`.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use socket2::{Domain, Socket, Type};

/// Bind a non-blocking listener with `SO_REUSEADDR` set, per §4.4.
pub fn create_listener(addr: SocketAddr, backlog: usize) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    Ok(socket.into())
}

/// The tracker's own address as seen by one accepted connection — used on
/// the first-ever request to learn the local (likely private) IP (§4.3
/// step 2).
pub fn local_ip_of(stream: &TcpStream) -> Option<Ipv4Addr> {
    match stream.local_addr().ok()? {
        SocketAddr::V4(addr) => Some(*addr.ip()),
        SocketAddr::V6(_) => None,
    }
}

/// The connecting peer's transport address.
pub fn peer_addr_of(stream: &TcpStream) -> Option<SocketAddr> {
    stream.peer_addr().ok()
}

/// RFC1918 membership, via the standard library's address classification
/// rather than the original's `"192"`/`"10."` string-prefix heuristic
/// (§9 design notes).
pub fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private()
}

/// A single blocking HTTP GET against a well-known "what is my IP"
/// endpoint, run once at startup before the accept loop exists, bounded
/// by `timeout` so a slow or unreachable endpoint can only delay startup
/// by that much. Any failure — network error, timeout, a body that
/// doesn't parse as an IPv4 dotted-quad — is non-fatal and leaves the
/// tracker in local-only mode (§4.5, §6).
pub fn fetch_public_ip(timeout: Duration) -> Option<Ipv4Addr> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .build();

    let body = agent
        .get("https://api.ipify.org")
        .call()
        .ok()?
        .into_string()
        .ok()?;

    body.trim().parse().ok()
}
