//! ASCII memcached wire protocol: incremental parsing (Component C) and
//! reply formatting, excluding `append`/`prepend` (spec §1 Non-goals).

mod codec;
mod command;
mod reply;

pub use codec::{parse, MalformedKind, ParseOutcome};
pub use command::{Command, DeltaVerb, Retrieve, StoreVerb};
pub use reply::{format_reply, format_stat_line, format_value_line, Reply};
