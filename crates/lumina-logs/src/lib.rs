//! Asynchronous, best-effort trace pipeline.
//!
//! The proxy hands finished request traces to [`Pipeline::submit`], which
//! never blocks: entries go into a bounded queue and are bulk-indexed into
//! the search backend by a small worker pool. The same pipeline answers
//! search, lookup, and aggregate queries against the index. It is an
//! observability channel, not a ledger — on overload or partial indexing
//! failure, entries are dropped and the drop is logged.

pub mod entry;
pub mod error;
pub mod pipeline;
pub mod search;

pub use entry::{LogEntry, LogMessages, MetricsLog, Overview, RequestLog, ResponseLog, UsageLog};
pub use error::LogError;
pub use pipeline::Pipeline;
pub use search::{SearchParams, INDEX_NAME};
