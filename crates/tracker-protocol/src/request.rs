//! Recursive-descent parser for the four request verbs.
//!
//! The grammar is LL(1) once the verb has been identified, so a hand-written
//! scanner over whitespace-separated tokens is used instead of pulling in a
//! regex engine: brackets (`[`/`]`) are treated as punctuation glued to the
//! token before or after them rather than as separate tokens, mirroring how
//! the grammar itself writes them.

use std::iter::Peekable;
use std::str::SplitWhitespace;

use crate::common::{AnnouncedSeed, FilterOp, FILENAME_MAX_LEN, HASH_MAX_LEN, MAX_SEED_ENTRIES};
use crate::error::ProtocolError;

/// A fully parsed request, ready for the processor to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Announce {
        port: u16,
        seeds: Vec<AnnouncedSeed>,
        leeches: Vec<String>,
        /// Set when the seed or leech list exceeded [`MAX_SEED_ENTRIES`] and
        /// was truncated rather than rejected.
        truncated: bool,
    },
    Look {
        filename: Option<String>,
        filesize: Option<(FilterOp, i64)>,
    },
    GetFile {
        hash: String,
    },
    Update {
        seeds: Vec<String>,
        leeches: Vec<String>,
        truncated: bool,
    },
}

type Tokens<'a> = Peekable<SplitWhitespace<'a>>;

/// Parse a single request line. A trailing `\r` and/or `\n` is tolerated and
/// stripped before parsing begins.
pub fn parse(line: &str) -> Result<Command, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']).trim_start();

    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();

    match verb {
        "announce" => parse_announce(rest),
        "look" => parse_look(rest),
        "getfile" => parse_getfile(rest),
        "update" => parse_update(rest),
        other => Err(ProtocolError::UnknownVerb(other.to_string())),
    }
}

/// Consume a `[...]` group from `tokens`, where `[` and `]` are glued to the
/// first and last inner token respectively (or to the same token, for an
/// empty `[]` group). Returns the inner tokens with brackets stripped.
fn collect_bracket<'a>(
    tokens: &mut Tokens<'a>,
    verb: &'static str,
) -> Result<Vec<&'a str>, ProtocolError> {
    let first = tokens
        .next()
        .ok_or_else(|| ProtocolError::malformed(verb, "expected '['"))?;

    let first = first
        .strip_prefix('[')
        .ok_or_else(|| ProtocolError::malformed(verb, "expected '['"))?;

    if let Some(only) = first.strip_suffix(']') {
        return Ok(if only.is_empty() { Vec::new() } else { vec![only] });
    }

    let mut items = vec![first];

    loop {
        let tok = tokens
            .next()
            .ok_or_else(|| ProtocolError::malformed(verb, "unterminated '['"))?;

        if let Some(last) = tok.strip_suffix(']') {
            items.push(last);
            break;
        }

        items.push(tok);
    }

    Ok(items)
}

fn parse_announce(rest: &str) -> Result<Command, ProtocolError> {
    const VERB: &str = "announce";

    let mut tokens: Tokens = rest.split_whitespace().peekable();

    if tokens.next() != Some("listen") {
        return Err(ProtocolError::malformed(VERB, "expected 'listen'"));
    }

    let port: u16 = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| ProtocolError::malformed(VERB, "invalid port"))?;

    let mut truncated = false;
    let mut seeds = Vec::new();

    if tokens.peek() == Some(&"seed") {
        tokens.next();

        let items = collect_bracket(&mut tokens, VERB)?;

        if items.len() % 4 != 0 {
            return Err(ProtocolError::malformed(VERB, "seed list not a multiple of 4"));
        }

        let mut groups: Vec<&[&str]> = items.chunks(4).collect();

        if groups.len() > MAX_SEED_ENTRIES {
            groups.truncate(MAX_SEED_ENTRIES);
            truncated = true;
        }

        for group in groups {
            let filename = group[0].to_string();
            let size: i64 = group[1]
                .parse()
                .map_err(|_| ProtocolError::malformed(VERB, "invalid seed size"))?;
            let chunk_size: i32 = group[2]
                .parse()
                .map_err(|_| ProtocolError::malformed(VERB, "invalid seed chunk_size"))?;
            let hash = group[3].to_string();

            if filename.len() > FILENAME_MAX_LEN {
                return Err(ProtocolError::malformed(VERB, "filename too long"));
            }
            if hash.len() > HASH_MAX_LEN {
                return Err(ProtocolError::malformed(VERB, "hash too long"));
            }

            seeds.push(AnnouncedSeed {
                filename,
                size,
                chunk_size,
                hash,
            });
        }
    }

    let mut leeches = Vec::new();

    if tokens.peek() == Some(&"leech") {
        tokens.next();

        let mut items = collect_bracket(&mut tokens, VERB)?;

        if items.len() > MAX_SEED_ENTRIES {
            items.truncate(MAX_SEED_ENTRIES);
            truncated = true;
        }

        leeches = items.drain(..).map(str::to_string).collect();
    }

    if tokens.next().is_some() {
        return Err(ProtocolError::malformed(VERB, "unexpected trailing tokens"));
    }

    Ok(Command::Announce {
        port,
        seeds,
        leeches,
        truncated,
    })
}

fn parse_look(rest: &str) -> Result<Command, ProtocolError> {
    const VERB: &str = "look";

    let mut tokens: Tokens = rest.split_whitespace().peekable();
    let items = collect_bracket(&mut tokens, VERB)?;

    if tokens.next().is_some() {
        return Err(ProtocolError::malformed(VERB, "unexpected trailing tokens"));
    }

    let mut filename = None;
    let mut filesize = None;

    for item in items {
        if let Some(quoted) = item.strip_prefix("filename=") {
            filename = Some(parse_quoted(quoted, VERB)?.to_string());
        } else if let Some(op_and_value) = item.strip_prefix("filesize") {
            let mut chars = op_and_value.chars();
            let op_char = chars
                .next()
                .ok_or_else(|| ProtocolError::malformed(VERB, "missing filesize operator"))?;

            let op = match op_char {
                '=' => FilterOp::Eq,
                '<' => FilterOp::Lt,
                '>' => FilterOp::Gt,
                _ => return Err(ProtocolError::malformed(VERB, "invalid filesize operator")),
            };

            let quoted = &op_and_value[op_char.len_utf8()..];
            let value_str = parse_quoted(quoted, VERB)?;
            let value: i64 = value_str
                .parse()
                .map_err(|_| ProtocolError::malformed(VERB, "invalid filesize value"))?;

            filesize = Some((op, value));
        } else {
            return Err(ProtocolError::malformed(VERB, "unrecognized look clause"));
        }
    }

    Ok(Command::Look { filename, filesize })
}

fn parse_quoted<'a>(s: &'a str, verb: &'static str) -> Result<&'a str, ProtocolError> {
    let quote = s
        .chars()
        .next()
        .ok_or_else(|| ProtocolError::malformed(verb, "expected quoted value"))?;

    if quote != '\'' && quote != '"' {
        return Err(ProtocolError::malformed(verb, "expected quoted value"));
    }

    s.strip_prefix(quote)
        .and_then(|s| s.strip_suffix(quote))
        .ok_or_else(|| ProtocolError::malformed(verb, "unterminated quote"))
}

fn parse_getfile(rest: &str) -> Result<Command, ProtocolError> {
    const VERB: &str = "getfile";

    let mut tokens = rest.split_whitespace();

    let hash = tokens
        .next()
        .ok_or_else(|| ProtocolError::malformed(VERB, "missing hash"))?;

    if tokens.next().is_some() {
        return Err(ProtocolError::malformed(VERB, "unexpected trailing tokens"));
    }

    if hash.len() > HASH_MAX_LEN {
        return Err(ProtocolError::malformed(VERB, "hash too long"));
    }

    Ok(Command::GetFile {
        hash: hash.to_string(),
    })
}

fn parse_update(rest: &str) -> Result<Command, ProtocolError> {
    const VERB: &str = "update";

    let mut tokens: Tokens = rest.split_whitespace().peekable();
    let mut truncated = false;

    let mut seeds = Vec::new();
    if tokens.peek() == Some(&"seed") {
        tokens.next();
        let mut items = collect_bracket(&mut tokens, VERB)?;
        if items.len() > MAX_SEED_ENTRIES {
            items.truncate(MAX_SEED_ENTRIES);
            truncated = true;
        }
        seeds = items.drain(..).map(str::to_string).collect();
    }

    let mut leeches = Vec::new();
    if tokens.peek() == Some(&"leech") {
        tokens.next();
        let mut items = collect_bracket(&mut tokens, VERB)?;
        if items.len() > MAX_SEED_ENTRIES {
            items.truncate(MAX_SEED_ENTRIES);
            truncated = true;
        }
        leeches = items.drain(..).map(str::to_string).collect();
    }

    if tokens.next().is_some() {
        return Err(ProtocolError::malformed(VERB, "unexpected trailing tokens"));
    }

    Ok(Command::Update {
        seeds,
        leeches,
        truncated,
    })
}
