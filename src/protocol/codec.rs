//! Component C — the incremental request parser (spec §4.C).
//!
//! `parse` is the sole entry point: given the connection's accumulated
//! read buffer and a cursor into it, it either returns a fully framed
//! [`Command`] (header line *and*, for store commands, the trailing data
//! block) and the new cursor, reports that more bytes are needed, or
//! reports a malformed request. Nothing here allocates beyond the
//! occasional owned `String` inside a malformed-request message; key
//! and value bytes are always slices of `buffer`.

use crate::protocol::command::{Command, DeltaVerb, Retrieve, StoreVerb};

/// Sane ceiling on a store command's client-supplied `bytes` field.
///
/// The codec has no access to the table's configured item size — it's a
/// pure byte-stream parser (spec §4.C) — so this is a fixed bound rather
/// than a config-derived one, matching real memcached's default maximum
/// item size. Its purpose isn't to be the authoritative "too large for
/// this table" check (the dispatcher/table already reject that with
/// `CLIENT_ERROR bad data chunk` without closing the connection); it's
/// to rule out a `bytes` value so large that `after_header + bytes + 2`
/// would overflow or index past the end of the buffer before the data
/// block has even started arriving.
const MAX_VALUE_BYTES: usize = 1024 * 1024;

/// Outcome of one `parse` call.
#[derive(Debug)]
pub enum ParseOutcome<'a> {
    /// A full command was framed; the second field is the cursor
    /// position immediately after it.
    Parsed(Command<'a>, usize),
    /// `buffer[cursor..]` holds a valid prefix of a request. The caller
    /// must read more bytes and retry from the same `cursor`.
    Incomplete,
    /// The request is unrecoverable; the connection closes after the
    /// corresponding error reply is flushed.
    Malformed(MalformedKind),
}

/// Why a request was rejected outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    /// The command verb isn't recognized (spec §9: includes `append`
    /// and `prepend`, which are deliberately unsupported).
    UnknownCommand,
    /// A recognized command with a malformed argument list or data block.
    BadFormat(String),
}

/// Parse exactly one request starting at `cursor`.
pub fn parse(buffer: &[u8], cursor: usize) -> ParseOutcome<'_> {
    let remaining = &buffer[cursor..];
    let header_len = match find_crlf(remaining) {
        Some(n) => n,
        None => return ParseOutcome::Incomplete,
    };
    let line = &remaining[..header_len];
    let after_header = cursor + header_len + 2;

    let mut tok = Tokenizer::new(line);
    let verb = match tok.next() {
        Some(v) => v,
        None => return bad_format("empty command line"),
    };

    match verb {
        b"get" | b"gets" => parse_retrieve(verb == b"gets", &mut tok, after_header),
        b"set" | b"add" | b"replace" | b"cas" => parse_store(verb, &mut tok, buffer, after_header),
        b"incr" | b"decr" => parse_delta(verb == b"incr", &mut tok, after_header),
        b"delete" => parse_delete(&mut tok, after_header),
        b"flush_all" => parse_flush_all(&mut tok, after_header),
        b"version" => ParseOutcome::Parsed(Command::Version, after_header),
        b"quit" => ParseOutcome::Parsed(Command::Quit, after_header),
        b"stats" => ParseOutcome::Parsed(Command::Stats, after_header),
        _ => ParseOutcome::Malformed(MalformedKind::UnknownCommand),
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn bad_format<'a>(msg: &str) -> ParseOutcome<'a> {
    ParseOutcome::Malformed(MalformedKind::BadFormat(msg.to_string()))
}

fn parse_retrieve(with_cas: bool, tok: &mut Tokenizer<'_>, after_header: usize) -> ParseOutcome<'_> {
    let blob = tok.remainder_trimmed();
    if blob.is_empty() {
        return bad_format("get requires at least one key");
    }
    ParseOutcome::Parsed(
        Command::Retrieve(Retrieve::new(blob, with_cas)),
        after_header,
    )
}

fn parse_store<'a>(
    verb: &[u8],
    tok: &mut Tokenizer<'a>,
    buffer: &'a [u8],
    after_header: usize,
) -> ParseOutcome<'a> {
    let verb_kind = match verb {
        b"set" => StoreVerb::Set,
        b"add" => StoreVerb::Add,
        b"replace" => StoreVerb::Replace,
        b"cas" => StoreVerb::Cas,
        _ => unreachable!("parse dispatches store verbs exhaustively"),
    };

    let key = match tok.next() {
        Some(k) => k,
        None => return bad_format("missing key"),
    };
    let flags = match parse_u32(tok.next()) {
        Some(f) => f,
        None => return bad_format("bad command line format"),
    };
    let exptime = match parse_i64(tok.next()) {
        Some(e) => e,
        None => return bad_format("bad command line format"),
    };
    let bytes = match parse_usize(tok.next()) {
        Some(b) => b,
        None => return bad_format("bad command line format"),
    };
    if bytes > MAX_VALUE_BYTES {
        // Large enough to risk overflowing `after_header + bytes + 2` or
        // slicing past the buffer below; framing can't be trusted, so
        // this is unrecoverable for the connection rather than a
        // dispatcher-level "too large for this table" reply.
        return bad_format("bad data chunk");
    }
    let cas_unique = if verb_kind == StoreVerb::Cas {
        match parse_u64(tok.next()) {
            Some(c) => Some(c),
            None => return bad_format("missing cas unique"),
        }
    } else {
        None
    };
    let noreply = match parse_noreply(tok) {
        Ok(n) => n,
        Err(e) => return e,
    };

    if buffer.len() < after_header + bytes + 2 {
        return ParseOutcome::Incomplete;
    }
    let data = &buffer[after_header..after_header + bytes];
    let terminator = &buffer[after_header + bytes..after_header + bytes + 2];
    if terminator != b"\r\n" {
        return bad_format("bad data chunk");
    }

    ParseOutcome::Parsed(
        Command::Store {
            verb: verb_kind,
            key,
            flags,
            exptime,
            cas_unique,
            noreply,
            data,
        },
        after_header + bytes + 2,
    )
}

fn parse_delta(is_incr: bool, tok: &mut Tokenizer<'_>, after_header: usize) -> ParseOutcome<'_> {
    let key = match tok.next() {
        Some(k) => k,
        None => return bad_format("missing key"),
    };
    let delta = match parse_u64(tok.next()) {
        Some(d) => d,
        None => return bad_format("invalid numeric delta argument"),
    };
    let noreply = match parse_noreply(tok) {
        Ok(n) => n,
        Err(e) => return e,
    };
    let verb = if is_incr { DeltaVerb::Incr } else { DeltaVerb::Decr };
    ParseOutcome::Parsed(
        Command::Delta {
            verb,
            key,
            delta,
            noreply,
        },
        after_header,
    )
}

fn parse_delete(tok: &mut Tokenizer<'_>, after_header: usize) -> ParseOutcome<'_> {
    let key = match tok.next() {
        Some(k) => k,
        None => return bad_format("missing key"),
    };
    let noreply = match parse_noreply(tok) {
        Ok(n) => n,
        Err(e) => return e,
    };
    ParseOutcome::Parsed(Command::Delete { key, noreply }, after_header)
}

fn parse_flush_all(tok: &mut Tokenizer<'_>, after_header: usize) -> ParseOutcome<'_> {
    let (delay, noreply) = match tok.next() {
        None => (None, false),
        Some(b"noreply") => (None, true),
        Some(first) => {
            let delay = match parse_i64(Some(first)) {
                Some(d) => d,
                None => return bad_format("invalid delay"),
            };
            let noreply = match parse_noreply(tok) {
                Ok(n) => n,
                Err(e) => return e,
            };
            (Some(delay), noreply)
        }
    };
    ParseOutcome::Parsed(Command::FlushAll { delay, noreply }, after_header)
}

/// Consume an optional trailing `noreply` token; any other trailing
/// token is a malformed request.
fn parse_noreply<'a>(tok: &mut Tokenizer<'a>) -> Result<bool, ParseOutcome<'a>> {
    match tok.next() {
        None => Ok(false),
        Some(b"noreply") => Ok(true),
        Some(_) => Err(bad_format("unexpected trailing token")),
    }
}

fn parse_u32(tok: Option<&[u8]>) -> Option<u32> {
    std::str::from_utf8(tok?).ok()?.parse().ok()
}

fn parse_u64(tok: Option<&[u8]>) -> Option<u64> {
    std::str::from_utf8(tok?).ok()?.parse().ok()
}

fn parse_usize(tok: Option<&[u8]>) -> Option<usize> {
    std::str::from_utf8(tok?).ok()?.parse().ok()
}

fn parse_i64(tok: Option<&[u8]>) -> Option<i64> {
    std::str::from_utf8(tok?).ok()?.parse().ok()
}

/// Zero-allocation whitespace tokenizer over a single header line.
struct Tokenizer<'a> {
    rest: &'a [u8],
}

impl<'a> Tokenizer<'a> {
    fn new(line: &'a [u8]) -> Self {
        Self { rest: line }
    }

    fn next(&mut self) -> Option<&'a [u8]> {
        self.skip_spaces();
        if self.rest.is_empty() {
            return None;
        }
        let end = self.rest.iter().position(|&b| b == b' ').unwrap_or(self.rest.len());
        let tok = &self.rest[..end];
        self.rest = &self.rest[end..];
        Some(tok)
    }

    /// Everything left after the last consumed token, with leading
    /// spaces trimmed — used for `get`/`gets`' space-separated key list.
    fn remainder_trimmed(&self) -> &'a [u8] {
        let mut r = self.rest;
        while let Some(&b) = r.first() {
            if b == b' ' {
                r = &r[1..];
            } else {
                break;
            }
        }
        r
    }

    fn skip_spaces(&mut self) {
        while let Some(&b) = self.rest.first() {
            if b == b' ' {
                self.rest = &self.rest[1..];
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_parsed(buffer: &[u8]) -> (Command<'_>, usize) {
        match parse(buffer, 0) {
            ParseOutcome::Parsed(cmd, cursor) => (cmd, cursor),
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn parses_single_key_get() {
        let (cmd, cursor) = expect_parsed(b"get foo\r\n");
        assert_eq!(cursor, 9);
        match cmd {
            Command::Retrieve(r) => {
                assert!(!r.with_cas);
                assert_eq!(r.keys().collect::<Vec<_>>(), vec![b"foo".as_slice()]);
            }
            other => panic!("expected Retrieve, got {other:?}"),
        }
    }

    #[test]
    fn parses_multi_key_gets() {
        let (cmd, _) = expect_parsed(b"gets a b c\r\n");
        match cmd {
            Command::Retrieve(r) => {
                assert!(r.with_cas);
                assert_eq!(
                    r.keys().collect::<Vec<_>>(),
                    vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]
                );
            }
            other => panic!("expected Retrieve, got {other:?}"),
        }
    }

    #[test]
    fn parses_set_with_data_block() {
        let (cmd, cursor) = expect_parsed(b"set foo 0 0 5\r\nhello\r\n");
        assert_eq!(cursor, b"set foo 0 0 5\r\nhello\r\n".len());
        match cmd {
            Command::Store {
                verb,
                key,
                flags,
                exptime,
                cas_unique,
                noreply,
                data,
            } => {
                assert_eq!(verb, StoreVerb::Set);
                assert_eq!(key, b"foo");
                assert_eq!(flags, 0);
                assert_eq!(exptime, 0);
                assert_eq!(cas_unique, None);
                assert!(!noreply);
                assert_eq!(data, b"hello");
            }
            other => panic!("expected Store, got {other:?}"),
        }
    }

    #[test]
    fn parses_cas_with_cas_unique() {
        let (cmd, _) = expect_parsed(b"cas foo 0 0 3 999\r\nbaz\r\n");
        match cmd {
            Command::Store {
                verb, cas_unique, data, ..
            } => {
                assert_eq!(verb, StoreVerb::Cas);
                assert_eq!(cas_unique, Some(999));
                assert_eq!(data, b"baz");
            }
            other => panic!("expected Store, got {other:?}"),
        }
    }

    #[test]
    fn absurd_bytes_field_is_malformed_not_a_panic_or_oob_slice() {
        // A `bytes` this large would overflow `after_header + bytes + 2`
        // and then index past the buffer if it were trusted as-is.
        let outcome = parse(b"set k 0 0 18446744073709551615\r\n", 0);
        assert!(matches!(
            outcome,
            ParseOutcome::Malformed(MalformedKind::BadFormat(_))
        ));
    }

    #[test]
    fn bytes_field_just_over_the_ceiling_is_malformed() {
        let line = format!("set k 0 0 {}\r\n", MAX_VALUE_BYTES + 1);
        let outcome = parse(line.as_bytes(), 0);
        assert!(matches!(
            outcome,
            ParseOutcome::Malformed(MalformedKind::BadFormat(_))
        ));
    }

    #[test]
    fn bytes_field_at_the_ceiling_is_accepted_as_incomplete() {
        // At the boundary, the field itself is valid; the data block just
        // hasn't arrived yet, which is an ordinary Incomplete, not Malformed.
        let line = format!("set k 0 0 {}\r\n", MAX_VALUE_BYTES);
        let outcome = parse(line.as_bytes(), 0);
        assert!(matches!(outcome, ParseOutcome::Incomplete));
    }

    #[test]
    fn set_missing_data_block_is_incomplete() {
        // header is complete but the value bytes haven't arrived yet.
        let outcome = parse(b"set foo 0 0 5\r\nhel", 0);
        assert!(matches!(outcome, ParseOutcome::Incomplete));
    }

    #[test]
    fn header_without_crlf_is_incomplete() {
        let outcome = parse(b"get foo", 0);
        assert!(matches!(outcome, ParseOutcome::Incomplete));
    }

    #[test]
    fn bad_data_block_terminator_is_malformed() {
        let outcome = parse(b"set foo 0 0 5\r\nhelloXX", 0);
        assert!(matches!(
            outcome,
            ParseOutcome::Malformed(MalformedKind::BadFormat(_))
        ));
    }

    #[test]
    fn unknown_command_is_malformed() {
        let outcome = parse(b"frobnicate foo\r\n", 0);
        assert!(matches!(
            outcome,
            ParseOutcome::Malformed(MalformedKind::UnknownCommand)
        ));
    }

    #[test]
    fn append_and_prepend_are_unknown_commands() {
        for line in [b"append foo 0 0 3\r\n".as_slice(), b"prepend foo 0 0 3\r\n"] {
            let outcome = parse(line, 0);
            assert!(matches!(
                outcome,
                ParseOutcome::Malformed(MalformedKind::UnknownCommand)
            ));
        }
    }

    #[test]
    fn parses_incr_and_decr() {
        let (cmd, _) = expect_parsed(b"incr x 3\r\n");
        match cmd {
            Command::Delta { verb, key, delta, noreply } => {
                assert_eq!(verb, DeltaVerb::Incr);
                assert_eq!(key, b"x");
                assert_eq!(delta, 3);
                assert!(!noreply);
            }
            other => panic!("expected Delta, got {other:?}"),
        }

        let (cmd, _) = expect_parsed(b"decr x 100 noreply\r\n");
        match cmd {
            Command::Delta { verb, noreply, .. } => {
                assert_eq!(verb, DeltaVerb::Decr);
                assert!(noreply);
            }
            other => panic!("expected Delta, got {other:?}"),
        }
    }

    #[test]
    fn parses_delete_with_noreply() {
        let (cmd, _) = expect_parsed(b"delete foo noreply\r\n");
        match cmd {
            Command::Delete { key, noreply } => {
                assert_eq!(key, b"foo");
                assert!(noreply);
            }
            other => panic!("expected Delete, got {other:?}"),
        }
    }

    #[test]
    fn parses_flush_all_variants() {
        let (cmd, _) = expect_parsed(b"flush_all\r\n");
        assert!(matches!(cmd, Command::FlushAll { delay: None, noreply: false }));

        let (cmd, _) = expect_parsed(b"flush_all 30\r\n");
        assert!(matches!(cmd, Command::FlushAll { delay: Some(30), noreply: false }));

        let (cmd, _) = expect_parsed(b"flush_all noreply\r\n");
        assert!(matches!(cmd, Command::FlushAll { delay: None, noreply: true }));

        let (cmd, _) = expect_parsed(b"flush_all 30 noreply\r\n");
        assert!(matches!(cmd, Command::FlushAll { delay: Some(30), noreply: true }));
    }

    #[test]
    fn parses_misc_commands() {
        assert!(matches!(expect_parsed(b"version\r\n").0, Command::Version));
        assert!(matches!(expect_parsed(b"quit\r\n").0, Command::Quit));
        assert!(matches!(expect_parsed(b"stats\r\n").0, Command::Stats));
    }

    #[test]
    fn restartability_across_every_split_point() {
        // Property 7: for any split of a valid request, feeding the prefix
        // yields Incomplete, and feeding the whole thing afterward yields
        // the same parsed command as feeding it in one shot.
        let full: &[u8] = b"set restart-key 1 0 5\r\nhello\r\n";
        let (whole_cmd, whole_cursor) = expect_parsed(full);

        for split in 1..full.len() {
            let prefix = &full[..split];
            match parse(prefix, 0) {
                ParseOutcome::Incomplete => {}
                ParseOutcome::Parsed(_, _) => {
                    // Only valid if the prefix happens to already be a
                    // complete, independently-valid request; not the case
                    // here since `full` has no embedded CRLF CRLF early exit.
                    panic!("split at {split} unexpectedly parsed a full command early");
                }
                ParseOutcome::Malformed(_) => panic!("split at {split} was malformed"),
            }
        }

        let (resplit_cmd, resplit_cursor) = expect_parsed(full);
        assert_eq!(resplit_cursor, whole_cursor);
        match (whole_cmd, resplit_cmd) {
            (
                Command::Store { key: k1, data: d1, .. },
                Command::Store { key: k2, data: d2, .. },
            ) => {
                assert_eq!(k1, k2);
                assert_eq!(d1, d2);
            }
            _ => panic!("expected Store on both parses"),
        }
    }
}
