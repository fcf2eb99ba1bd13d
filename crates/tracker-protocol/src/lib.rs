//! Wire grammar for the tracker's line-oriented TCP protocol.
//!
//! A request is a single ASCII line (an optional trailing `\r` and/or `\n` is
//! tolerated). [`request::parse`] turns it into a [`request::Command`]; the
//! [`response`] module turns the processor's results back into the reply
//! line that goes out on the wire.

pub mod common;
pub mod error;
pub mod request;
pub mod response;

pub use common::{AnnouncedSeed, FilterOp, ListEntry};
pub use error::ProtocolError;
pub use request::Command;
