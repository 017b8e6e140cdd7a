#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::all, clippy::pedantic, missing_docs)]

//! Reconciliation of completed torrents from a source downloader into a
//! destination downloader.
//!
//! Layout: `filter.rs` (pure eligibility predicate), `tracker.rs` (recheck
//! bookkeeping), `engine.rs` (the run loop and per-torrent state machine),
//! `record.rs` (run outcomes), `metainfo.rs` (`.torrent` lookup),
//! `deadline.rs` (per-call timeouts), `error.rs`.

pub mod deadline;
pub mod engine;
pub mod error;
pub mod filter;
pub mod metainfo;
pub mod record;
pub mod tracker;

pub use deadline::TimedAdapter;
pub use engine::{EngineOptions, ReconciliationEngine, relocate};
pub use error::{EngineError, EngineResult};
pub use filter::{FilterDecision, FilterReason, matches};
pub use metainfo::{FsMetainfoStore, MetainfoStore};
pub use record::{Decision, FailureKind, Phase, RunRecord, SkipReason, TorrentOutcome};
pub use tracker::{PollOutcome, RecheckEntry, RecheckTracker, VerificationFailure};
