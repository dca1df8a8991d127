//! Typed commands produced by [`crate::protocol::codec::parse`] (spec §4.C).
//!
//! Every variant borrows its key/value bytes straight out of the
//! connection's read buffer — nothing here copies or allocates beyond
//! the handful of primitive fields parsed out of the header line.

/// The four store-family verbs; they differ only in how the dispatcher
/// resolves them against the table (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreVerb {
    Set,
    Add,
    Replace,
    Cas,
}

/// `incr`/`decr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaVerb {
    Incr,
    Decr,
}

/// A parsed `get`/`gets` request. Keys stay packed in their original
/// space-separated form; [`Retrieve::keys`] splits them lazily so
/// multi-key lookups never allocate a `Vec` just to hold borrows.
#[derive(Debug, Clone, Copy)]
pub struct Retrieve<'a> {
    keys_blob: &'a [u8],
    pub with_cas: bool,
}

impl<'a> Retrieve<'a> {
    pub(crate) fn new(keys_blob: &'a [u8], with_cas: bool) -> Self {
        Self { keys_blob, with_cas }
    }

    /// Iterate the requested keys in request order.
    pub fn keys(&self) -> impl Iterator<Item = &'a [u8]> {
        self.keys_blob
            .split(|&b| b == b' ')
            .filter(|s| !s.is_empty())
    }
}

/// A fully-framed command: for store-family commands this already
/// includes the data block, since `parse` only returns `Parsed` once
/// the whole request — header line and data block alike — is buffered.
#[derive(Debug)]
pub enum Command<'a> {
    Retrieve(Retrieve<'a>),
    Store {
        verb: StoreVerb,
        key: &'a [u8],
        flags: u32,
        exptime: i64,
        cas_unique: Option<u64>,
        noreply: bool,
        data: &'a [u8],
    },
    Delta {
        verb: DeltaVerb,
        key: &'a [u8],
        delta: u64,
        noreply: bool,
    },
    Delete {
        key: &'a [u8],
        noreply: bool,
    },
    FlushAll {
        delay: Option<i64>,
        noreply: bool,
    },
    Version,
    Quit,
    Stats,
}

impl Command<'_> {
    /// Whether the client asked to suppress the reply entirely. `Version`,
    /// `Quit`, and `Stats` never carry `noreply` in the wire grammar.
    pub fn noreply(&self) -> bool {
        match self {
            Command::Store { noreply, .. }
            | Command::Delta { noreply, .. }
            | Command::Delete { noreply, .. }
            | Command::FlushAll { noreply, .. } => *noreply,
            Command::Retrieve(_) | Command::Version | Command::Quit | Command::Stats => false,
        }
    }
}
