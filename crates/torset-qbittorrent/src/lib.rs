#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::all, clippy::pedantic, missing_docs)]

//! qBittorrent adapter speaking the Web API v2.
//!
//! Layout: `client.rs` (session handling and the `DownloaderAdapter`
//! implementation), `wire.rs` (response payloads and state normalisation).

mod client;
mod wire;

pub use client::{QbittorrentAdapter, QbittorrentConfig};
