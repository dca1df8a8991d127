//! Reply formatting (spec §4.C response grammar).
//!
//! The formatter only appends to the caller's output buffer; flushing
//! it to the socket is the connection layer's job. `VALUE` lines are
//! written one at a time via [`format_value_line`] rather than
//! collected into a reply value first, so a multi-key `get` never holds
//! more than one item's borrow from the table alive at once.

/// Every fixed (non-`VALUE`, non-`STAT`) reply token from spec §4.C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Number(u64),
    Ok,
    Version,
    End,
    Error,
    ClientError(String),
    ServerError(String),
}

const CRLF: &[u8] = b"\r\n";

/// Append `reply`'s wire form to `out`.
pub fn format_reply(out: &mut Vec<u8>, reply: &Reply) {
    match reply {
        Reply::Stored => append_line(out, b"STORED"),
        Reply::NotStored => append_line(out, b"NOT_STORED"),
        Reply::Exists => append_line(out, b"EXISTS"),
        Reply::NotFound => append_line(out, b"NOT_FOUND"),
        Reply::Deleted => append_line(out, b"DELETED"),
        Reply::Ok => append_line(out, b"OK"),
        Reply::End => append_line(out, b"END"),
        Reply::Error => append_line(out, b"ERROR"),
        Reply::Number(n) => {
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(CRLF);
        }
        Reply::Version => {
            out.extend_from_slice(b"VERSION ");
            out.extend_from_slice(env!("CARGO_PKG_VERSION").as_bytes());
            out.extend_from_slice(CRLF);
        }
        Reply::ClientError(msg) => {
            out.extend_from_slice(b"CLIENT_ERROR ");
            out.extend_from_slice(msg.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Reply::ServerError(msg) => {
            out.extend_from_slice(b"SERVER_ERROR ");
            out.extend_from_slice(msg.as_bytes());
            out.extend_from_slice(CRLF);
        }
    }
}

fn append_line(out: &mut Vec<u8>, token: &[u8]) {
    out.extend_from_slice(token);
    out.extend_from_slice(CRLF);
}

/// Append one `VALUE <key> <flags> <bytes> [<cas>]\r\n<value>\r\n` record.
/// Callers append a final [`Reply::End`] once every key in a `get`/`gets`
/// has been handled this way.
pub fn format_value_line(out: &mut Vec<u8>, key: &[u8], flags: u32, value: &[u8], cas: Option<u64>) {
    out.extend_from_slice(b"VALUE ");
    out.extend_from_slice(key);
    out.push(b' ');
    out.extend_from_slice(flags.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(value.len().to_string().as_bytes());
    if let Some(cas) = cas {
        out.push(b' ');
        out.extend_from_slice(cas.to_string().as_bytes());
    }
    out.extend_from_slice(CRLF);
    out.extend_from_slice(value);
    out.extend_from_slice(CRLF);
}

/// Append one `STAT <name> <value>\r\n` line for the `stats` command.
pub fn format_stat_line(out: &mut Vec<u8>, name: &str, value: u64) {
    out.extend_from_slice(b"STAT ");
    out.extend_from_slice(name.as_bytes());
    out.push(b' ');
    out.extend_from_slice(value.to_string().as_bytes());
    out.extend_from_slice(CRLF);
}
