#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::all, clippy::pedantic, missing_docs)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (snapshot/policy builders), mocks.rs (scripted in-memory downloader).

pub mod fixtures;
pub mod mocks;

pub use mocks::{Call, FailureMode, Operation, ScriptedDownloader};
