/// Why a request line failed to parse.
///
/// Every variant is reported back to the peer identically (`"Wrong
/// request\n"`, see [`crate::response::WRONG_REQUEST`]); the distinction only
/// matters for the DEBUG-level log event the processor emits.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,
    #[error("unrecognized verb {0:?}")]
    UnknownVerb(String),
    #[error("malformed {verb} request: {reason}")]
    Malformed {
        verb: &'static str,
        reason: &'static str,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(verb: &'static str, reason: &'static str) -> Self {
        Self::Malformed { verb, reason }
    }
}
