//! A client-side engine reliably transferring large files to an object-storage-backed cloud drive.
//!
//! The crate is made of three tightly coupled pieces:
//! - a **resumable multipart upload** protocol, splitting files into signed part uploads and persisting enough
//!   progress to resume after a crash,
//! - a **remote path resolver**, mapping slash-delimited paths onto remote directory ids, creating missing directories
//!   and caching directory listings,
//! - an **asynchronous task waiter**, polling server-side tasks (move, rename, delete, share) until completion.
//!
//! Everything hangs off a [`Client`], which owns the [`DriveApi`](api::DriveApi) implementation, the progress
//! [`KvStore`](store::KvStore), the directory cache and its cancellation tokens. Independent clients share nothing.
//!
//! Upload progress is persisted in a flat key/value store, one file per key under its root directory:
//!
//! ```text
//!     - store root
//!       L session_{key}     upload session record (server-issued identifiers and signing info)
//!       L chunk_{key}       bytes uploaded so far
//!       L md5s_{key}        comma-joined part tokens
//! ```
//!
//! where `{key}` is the MD5 of the local file path, the remote directory and its resolved id. As a **strong
//! hypothesis**, a given `(local file, remote directory)` pair is uploaded by at most one process at a time: within
//! one client, a concurrent upload of the same pair fails with [`Error::SessionBusy`].
//!
//! Nothing is retried internally. Transport, API and local I/O errors abort the current call, resumability standing
//! in for retries on the upload path, while progress store failures are only logged.

mod error;
pub use error::*;

mod client;
pub use client::*;

pub mod api;
pub mod config;
pub mod download;
pub mod fingerprint;
mod ops;
pub mod oss;
pub mod progress;
pub mod resolver;
pub mod store;
pub mod task;
pub mod tree;
pub mod upload;

pub use config::ClientConfig;
pub use download::DownloadOptions;
pub use tree::{TreeOptions, TreeReport};
pub use upload::{UploadOptions, UploadOutcome, UploadReport};
