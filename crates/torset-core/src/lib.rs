#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::all, clippy::pedantic, missing_docs)]

//! Backend-agnostic torrent model and the downloader capability interface.
//!
//! Layout: `model/` (snapshots, labels, requests), `service/` (the
//! `DownloaderAdapter` trait), `error.rs` (adapter failures), `retry.rs`
//! (bounded retries for transient backend failures).

pub mod error;
pub mod model;
pub mod retry;
pub mod service;

pub use error::{AdapterError, AdapterErrorKind, AdapterResult};
pub use model::{
    AddTorrent, LabelSet, RateLimit, RemoveTorrent, TorrentId, TorrentSnapshot, TorrentState,
};
pub use retry::{RetryPolicy, retry_transient};
pub use service::DownloaderAdapter;
