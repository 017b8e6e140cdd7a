#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::all, clippy::pedantic, missing_docs)]

//! Torset application wiring.
//!
//! Layout: `bootstrap.rs` (config, logging and engine assembly),
//! `scheduler.rs` (cron, one-shot and recheck poll jobs), `notifier.rs`
//! (run summary logging), `error.rs`.

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application error type.
pub mod error;
/// Run summary notifications.
pub mod notifier;
/// Job scheduling around the reconciliation engine.
pub mod scheduler;

pub use bootstrap::{build_adapter, build_engine, run_app, run_app_with};
pub use error::{AppError, AppResult};
pub use scheduler::Scheduler;
