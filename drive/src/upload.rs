//! Resumable multipart uploads.
//!
//! An upload runs the following protocol, strictly in order:
//!
//! ```text
//!     identify      fingerprint the file, resolve the remote directory, derive the session key
//!     pre-register  reuse the persisted session or register (and persist) a new one
//!     hash          let the drive short-circuit content it already has
//!     resume        read back the persisted byte cursor and part tokens
//!     parts         sign and PUT every remaining part, persisting progress after each one
//!     commit        sign and POST the XML manifest of all part tokens
//!     finish        tell the drive the object is complete
//!     cleanup       forget the persisted progress, optionally remove the local file
//! ```
//!
//! Progress is persisted under three keys derived from the session key:
//! - `session_{key}`: the server-issued [`UploadSession`] record,
//! - `chunk_{key}`: the number of bytes uploaded so far,
//! - `md5s_{key}`: the comma-joined part tokens, in part order.
//!
//! Nothing is retried within a call: a failed upload resumes from its last persisted part on the next call.

use std::ffi::OsStr;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::fs;
use tokio::io::{self, AsyncReadExt, AsyncSeekExt};

use crate::api::{DriveApi, PartOutcome, PreRegister, UploadSession};
use crate::client::Client;
use crate::fingerprint::{mime_type, session_key, Fingerprint};
use crate::oss::{self, CommitUpload, PartUpload};
use crate::progress::{Meter, ProgressFn};
use crate::store::KvStore;
use crate::task::cancellable;
use crate::Error;

/// Remaps `(file name, remote directory)` before an upload.
pub type TransformFn = Arc<dyn Fn(&str, &str) -> (String, String) + Send + Sync>;

/// Options of a single file upload.
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Persist progress and resume from it.
    pub resumable: bool,
    /// Remove the local file once uploaded.
    pub delete_on_success: bool,
    /// Read cached directory listings while resolving the remote directory.
    pub use_dir_cache: bool,
    pub transform: Option<TransformFn>,
    pub progress: Option<ProgressFn>,
}

impl UploadOptions {
    #[inline]
    pub fn resumable(self, resumable: bool) -> Self {
        Self { resumable, ..self }
    }

    #[inline]
    pub fn delete_on_success(self, delete_on_success: bool) -> Self {
        Self {
            delete_on_success,
            ..self
        }
    }

    #[inline]
    pub fn use_dir_cache(self, use_dir_cache: bool) -> Self {
        Self { use_dir_cache, ..self }
    }

    #[inline]
    pub fn with_transform(self, transform: TransformFn) -> Self {
        Self {
            transform: Some(transform),
            ..self
        }
    }

    #[inline]
    pub fn with_progress(self, progress: ProgressFn) -> Self {
        Self {
            progress: Some(progress),
            ..self
        }
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("resumable", &self.resumable)
            .field("delete_on_success", &self.delete_on_success)
            .field("use_dir_cache", &self.use_dir_cache)
            .field("transform", &self.transform.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// How an upload completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Parts were transferred, `parts` of them within this call.
    Transferred { parts: u32 },
    /// The drive already had the content.
    HashMatched,
    /// The storage endpoint already had the whole part set.
    PartsComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Remote id of the uploaded file.
    pub fid: String,
    /// Remote id of the directory it was uploaded into.
    pub parent_id: String,
    pub outcome: UploadOutcome,
}

/// Persistence keys of one upload session.
struct Keys {
    session: String,
    chunk: String,
    md5s: String,
}

impl Keys {
    fn new(key: &str) -> Self {
        Self {
            session: format!("session_{key}"),
            chunk: format!("chunk_{key}"),
            md5s: format!("md5s_{key}"),
        }
    }
}

/// Resumable cursor within an upload session.
#[derive(Debug, Default, PartialEq, Eq)]
struct ChunkProgress {
    uploaded: u64,
    etags: Vec<String>,
}

impl ChunkProgress {
    /// Whether the cursor sits on a part boundary of the session and matches its part tokens.
    fn is_consistent(&self, part_size: u64, size: u64) -> bool {
        part_size > 0
            && self.uploaded <= size
            && (self.uploaded % part_size == 0 || self.uploaded == size)
            && self.uploaded.div_ceil(part_size) == self.etags.len() as u64
    }
}

impl<A: DriveApi, S: KvStore> Client<A, S> {
    /// Upload `local_file` into the remote directory `remote_dir`, creating missing directories.
    pub async fn upload_file(&self, local_file: impl AsRef<Path>, remote_dir: &str, options: &UploadOptions) -> Result<UploadReport, Error> {
        let local_file = local_file.as_ref();

        let size = fs::metadata(local_file).await?.len();
        let fingerprint = cancellable(&self.cancel(), async { Fingerprint::of_file(local_file).await.map_err(Error::from) }).await?;

        let name = local_file.file_name().and_then(OsStr::to_str).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` has no valid file name", local_file.display()),
            )
        })?;

        let (name, remote_dir) = match options.transform {
            Some(ref transform) => transform(name, remote_dir),
            None => (name.to_owned(), remote_dir.to_owned()),
        };

        let parent_id = self.resolve(&remote_dir, true, options.use_dir_cache).await?;
        let key = session_key(local_file, &remote_dir, &parent_id);
        let _guard = self.claim_session(&key)?;
        let keys = Keys::new(&key);

        tracing::debug!("Uploading `{}` to `{remote_dir}/{name}` (session {key})", local_file.display());

        let mime = mime_type(&name);
        let session = self.session(&keys, &parent_id, &name, size, mime, options.resumable).await?;

        let report = |outcome| UploadReport {
            fid: session.fid.clone(),
            parent_id: parent_id.clone(),
            outcome,
        };

        if cancellable(&self.cancel(), self.api().submit_hash(&fingerprint, &session.task_id)).await? {
            tracing::debug!("Content of `{}` already on the drive", local_file.display());

            self.complete(local_file, &keys, options).await?;
            return Ok(report(UploadOutcome::HashMatched));
        }

        let progress = if options.resumable {
            self.chunk_progress(&keys, &session, size)
        } else {
            ChunkProgress::default()
        };

        let Some((etags, parts)) = self.upload_parts(local_file, &session, &keys, progress, size, mime, options).await? else {
            self.complete(local_file, &keys, options).await?;
            return Ok(report(UploadOutcome::PartsComplete));
        };

        self.commit(&session, &etags).await?;
        tracing::debug!("Committed {} part(s) of `{}`", etags.len(), session.obj_key);

        cancellable(&self.cancel(), self.api().finish(&session.obj_key, &session.task_id)).await?;

        self.complete(local_file, &keys, options).await?;
        tracing::info!("Uploaded `{}` to `{remote_dir}/{name}`", local_file.display());

        Ok(report(UploadOutcome::Transferred { parts }))
    }

    /// Reuse the persisted session, or pre-register a new one and persist it before any transfer.
    async fn session(&self, keys: &Keys, parent_id: &str, name: &str, size: u64, mime: &str, resumable: bool) -> Result<UploadSession, Error> {
        if resumable {
            match self.cached::<UploadSession>(&keys.session) {
                Some(session) if !session.task_id.is_empty() && session.part_size > 0 => {
                    tracing::debug!("Resuming upload session `{}`", session.task_id);
                    return Ok(session);
                }
                Some(session) => tracing::warn!("Discarding unusable upload session `{}`", session.task_id),
                None => {}
            }
        }

        let request = PreRegister {
            parent_id: parent_id.to_owned(),
            file_name: name.to_owned(),
            size,
            mime_type: mime.to_owned(),
        };

        let session = cancellable(&self.cancel(), self.api().pre_register(&request)).await?;
        if session.part_size == 0 {
            return Err(Error::api(0, "upload session without part size"));
        }

        tracing::debug!("Registered upload session `{}` ({} bytes parts)", session.task_id, session.part_size);

        if resumable {
            // Part tokens of any previous session are meaningless to the new one.
            self.uncache(&keys.chunk);
            self.uncache(&keys.md5s);
            self.cache(&keys.session, &session);
        }

        Ok(session)
    }

    fn chunk_progress(&self, keys: &Keys, session: &UploadSession, size: u64) -> ChunkProgress {
        let progress = ChunkProgress {
            uploaded: self.cached::<u64>(&keys.chunk).unwrap_or_default(),
            etags: self
                .cached::<String>(&keys.md5s)
                .map(|md5s| md5s.split(',').filter(|etag| !etag.is_empty()).map(str::to_owned).collect())
                .unwrap_or_default(),
        };

        if progress.is_consistent(session.part_size, size) {
            progress
        } else {
            tracing::warn!(
                "Discarding inconsistent progress of `{}`: {} bytes for {} part(s)",
                session.task_id,
                progress.uploaded,
                progress.etags.len()
            );
            ChunkProgress::default()
        }
    }

    /// Upload every remaining part, returning all part tokens and the number of parts sent, or `None` when the storage
    /// endpoint reports the part set complete.
    #[allow(clippy::too_many_arguments)]
    async fn upload_parts(
        &self,
        local_file: &Path,
        session: &UploadSession,
        keys: &Keys,
        progress: ChunkProgress,
        size: u64,
        mime: &str,
        options: &UploadOptions,
    ) -> Result<Option<(Vec<String>, u32)>, Error> {
        let ChunkProgress { mut uploaded, mut etags } = progress;

        let url = oss::object_url(session)?;
        let user_agent = &self.config().storage_user_agent;

        let mut file = fs::File::open(local_file).await?;
        file.seek(SeekFrom::Start(uploaded)).await?;

        let mut part_number = u32::try_from(uploaded / session.part_size + 1).map_err(|_| Error::api(0, "too many parts"))?;
        let mut parts = 0;
        let mut meter = Meter::new(uploaded, size, options.progress.clone());

        while uploaded < size {
            let len = session.part_size.min(size - uploaded);
            let mut body = vec![0; len as usize];
            cancellable(&self.cancel(), async { file.read_exact(&mut body).await.map_err(Error::from) }).await?;

            let date = oss::http_date(Utc::now());
            let auth_meta = oss::part_auth_meta(session, mime, &date, user_agent, part_number);
            let authorization = cancellable(&self.cancel(), self.api().authorize(&session.auth_info, &auth_meta, &session.task_id)).await?;

            let part = PartUpload {
                url: url.clone(),
                authorization,
                content_type: mime.to_owned(),
                date,
                part_number,
                upload_id: session.upload_id.clone(),
                body: Bytes::from(body),
            };

            match cancellable(&self.cancel(), self.api().put_part(part)).await? {
                PartOutcome::Finished => {
                    tracing::debug!("Part set of `{}` already complete", session.obj_key);
                    return Ok(None);
                }
                PartOutcome::Uploaded(etag) => etags.push(etag),
            }

            uploaded += len;
            parts += 1;

            if options.resumable {
                self.cache(&keys.chunk, &uploaded);
                self.cache(&keys.md5s, &etags.join(","));
            }

            tracing::debug!("Uploaded part {part_number} of `{}` ({uploaded}/{size} bytes)", session.obj_key);
            meter.advance(len);

            part_number += 1;
        }

        Ok(Some((etags, parts)))
    }

    async fn commit(&self, session: &UploadSession, etags: &[String]) -> Result<(), Error> {
        let body = oss::manifest(etags);
        let content_md5 = oss::content_md5(body.as_bytes());
        let callback = oss::callback(session)?;
        let date = oss::http_date(Utc::now());

        let auth_meta = oss::commit_auth_meta(session, &content_md5, &callback, &date, &self.config().storage_user_agent);
        let authorization = cancellable(&self.cancel(), self.api().authorize(&session.auth_info, &auth_meta, &session.task_id)).await?;

        let commit = CommitUpload {
            url: oss::object_url(session)?,
            authorization,
            content_md5,
            callback,
            date,
            upload_id: session.upload_id.clone(),
            body,
        };

        cancellable(&self.cancel(), self.api().commit(commit)).await
    }

    /// Forget the persisted progress and remove the local file when asked to.
    async fn complete(&self, local_file: &Path, keys: &Keys, options: &UploadOptions) -> Result<(), Error> {
        if options.resumable {
            self.uncache(&keys.session);
            self.uncache(&keys.chunk);
            self.uncache(&keys.md5s);
        }

        if options.delete_on_success {
            fs::remove_file(local_file).await?;
            tracing::info!("Removed uploaded file `{}`", local_file.display());
        }

        Ok(())
    }
}
