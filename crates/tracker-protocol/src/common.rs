//! Value types shared between the request grammar and the reply formatters.

/// Maximum length, in bytes, of a `hash` token.
pub const HASH_MAX_LEN: usize = 63;

/// Maximum length, in bytes, of a `filename` token.
pub const FILENAME_MAX_LEN: usize = 351;

/// Upper bound on the number of seed/leech entries accepted in a single
/// `announce` or `update` request. Matches the original implementation's
/// fixed `MAX_SEED` cap; extra entries are truncated rather than rejected.
pub const MAX_SEED_ENTRIES: usize = 32;

/// Comparison operator carried by a `look [filesize<op>'n']` clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    /// No filesize clause was present; compare nothing.
    None,
    Eq,
    Lt,
    Gt,
}

/// A single `(filename, size, chunk_size, hash)` quadruple declared in an
/// `announce seed [...]` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnouncedSeed {
    pub filename: String,
    pub size: i64,
    pub chunk_size: i32,
    pub hash: String,
}

/// One entry rendered inside a `list [...]` reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub filename: String,
    pub size: i64,
    pub chunk_size: i32,
    pub hash: String,
}
