//! Remote drive API boundary.
//!
//! [`DriveApi`] lists the logical remote operations the transfer engine depends on, drive endpoints and object
//! storage requests alike. [`HttpDriveApi`] implements them over HTTP; tests drive the engine with an in-memory
//! implementation.

use std::future::Future;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::fingerprint::Fingerprint;
use crate::oss::{CommitUpload, PartUpload};
use crate::Error;

mod http;
pub use http::*;

mod types;
pub use types::*;

#[cfg(test)]
pub(crate) mod mock;

/// Streamed body of a download.
pub struct DownloadBody {
    /// Announced body length, if any.
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes, Error>>,
}

/// Remote drive operations.
///
/// Every operation is a single round trip: pagination, polling and protocol sequencing live in the callers.
pub trait DriveApi: Send + Sync {
    /// Fetch one page (starting at 1) of the children of `parent`, with the total number of children.
    fn list_page(&self, parent: &str, page: u32, size: u32) -> impl Future<Output = Result<(Vec<Entry>, u64), Error>> + Send;

    /// Create directory `name` under `parent` and return its id.
    fn create_dir(&self, name: &str, parent: &str) -> impl Future<Output = Result<String, Error>> + Send;

    /// Register a new upload and return its session.
    fn pre_register(&self, request: &PreRegister) -> impl Future<Output = Result<UploadSession, Error>> + Send;

    /// Submit the content fingerprint of an upload, returns whether the server already has the content.
    fn submit_hash(&self, fingerprint: &Fingerprint, task_id: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Sign a storage request described by its canonical string-to-sign.
    fn authorize(&self, auth_info: &str, auth_meta: &str, task_id: &str) -> impl Future<Output = Result<String, Error>> + Send;

    /// Upload one part to the storage endpoint.
    fn put_part(&self, part: PartUpload) -> impl Future<Output = Result<PartOutcome, Error>> + Send;

    /// Commit the multipart upload on the storage endpoint.
    fn commit(&self, commit: CommitUpload) -> impl Future<Output = Result<(), Error>> + Send;

    /// Notify the drive that `obj_key` is complete.
    fn finish(&self, obj_key: &str, task_id: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Query the status of an asynchronous task.
    fn query_task(&self, task_id: &str) -> impl Future<Output = Result<TaskHandle, Error>> + Send;

    /// Resolve a short-lived direct download URL.
    fn download_info(&self, fid: &str) -> impl Future<Output = Result<DownloadInfo, Error>> + Send;

    /// Open a streamed GET on a download URL.
    fn open_download(&self, url: &str) -> impl Future<Output = Result<DownloadBody, Error>> + Send;

    fn move_files(&self, fids: &[String], dest: &str) -> impl Future<Output = Result<TaskHandle, Error>> + Send;

    fn rename(&self, fid: &str, name: &str) -> impl Future<Output = Result<TaskHandle, Error>> + Send;

    fn delete_files(&self, fids: &[String]) -> impl Future<Output = Result<TaskHandle, Error>> + Send;

    fn share(&self, request: &ShareRequest) -> impl Future<Output = Result<TaskHandle, Error>> + Send;

    fn share_password(&self, share_id: &str) -> impl Future<Output = Result<SharePassword, Error>> + Send;
}
