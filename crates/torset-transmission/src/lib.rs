#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::all, clippy::pedantic, missing_docs)]

//! Transmission adapter speaking JSON-RPC over HTTP.
//!
//! Layout: `rpc.rs` (session-id handshake and request envelope),
//! `wire.rs` (torrent payloads and status normalisation), `adapter.rs`
//! (the `DownloaderAdapter` implementation).

mod adapter;
mod rpc;
mod wire;

pub use adapter::TransmissionAdapter;
pub use rpc::TransmissionConfig;
