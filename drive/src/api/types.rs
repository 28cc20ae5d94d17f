use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{Kind, StoreError, Stored, Value};
use crate::Error;

/// Common response envelope of the drive API.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T, M = Empty> {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
    pub metadata: Option<M>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Empty {}

impl<T, M> Envelope<T, M> {
    /// Fail on an error status or a non-zero code.
    pub fn check(&self) -> Result<(), Error> {
        if self.status >= 400 || self.code != 0 {
            Err(Error::api(self.code, self.message.clone()))
        } else {
            Ok(())
        }
    }

    pub fn into_data(self) -> Result<T, Error> {
        self.check()?;
        self.data.ok_or_else(|| Error::api(self.code, "response without data"))
    }

    pub fn into_parts(self) -> Result<(T, M), Error>
    where
        M: Default,
    {
        self.check()?;
        let metadata = self.metadata.unwrap_or_default();
        let data = self.data.ok_or_else(|| Error::api(self.code, "response without data"))?;
        Ok((data, metadata))
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Entry {
    pub fid: String,
    pub file_name: String,
    #[serde(default)]
    pub pdir_fid: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub format_type: String,
    /// Set for directories.
    #[serde(default)]
    pub dir: bool,
    /// Set for regular files.
    #[serde(default)]
    pub file: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntryList {
    #[serde(default)]
    pub list: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageMeta {
    #[serde(rename = "_total", default)]
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedDir {
    pub fid: String,
}

/// A pending (or already finished) asynchronous server operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskHandle {
    pub task_id: String,
    pub finished: bool,
    /// Delay to observe before the next status query.
    pub poll_interval: Duration,
    /// Last queried task record, `None` until the task has been queried once.
    pub task: Option<Task>,
}

impl TaskHandle {
    pub(crate) fn pending(doing: TaskDoing, meta: TaskMeta) -> Self {
        Self {
            task_id: doing.task_id,
            finished: doing.finish,
            poll_interval: meta.poll_interval(),
            task: None,
        }
    }

    pub(crate) fn queried(task: Task, meta: TaskMeta) -> Self {
        Self {
            task_id: task.task_id.clone(),
            finished: task.is_finished(),
            poll_interval: meta.poll_interval(),
            task: Some(task),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskDoing {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub finish: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TaskMeta {
    #[serde(default)]
    pub tq_gap: u64,
}

impl TaskMeta {
    #[inline]
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.tq_gap)
    }
}

/// A task record as reported by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub task_type: i64,
    #[serde(default)]
    pub task_title: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub share_id: String,
}

impl Task {
    /// The only status known to mean completion.
    pub const STATUS_FINISHED: i64 = 2;

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.status == Self::STATUS_FINISHED
    }
}

/// Post-commit webhook descriptor, forwarded as is to the storage endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadCallback {
    #[serde(rename = "callbackUrl", default)]
    pub callback_url: String,
    #[serde(rename = "callbackBody", default)]
    pub callback_body: String,
}

/// Pre-registration request of a new upload.
#[derive(Debug, Clone)]
pub struct PreRegister {
    pub parent_id: String,
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Server-issued identifiers of one resumable multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadSession {
    pub task_id: String,
    #[serde(default)]
    pub finish: bool,
    pub upload_id: String,
    pub obj_key: String,
    pub upload_url: String,
    #[serde(default)]
    pub fid: String,
    pub bucket: String,
    #[serde(default)]
    pub callback: UploadCallback,
    #[serde(default)]
    pub format_type: String,
    #[serde(default)]
    pub size: u64,
    pub auth_info: String,
    /// Size of every part but the last one.
    #[serde(default)]
    pub part_size: u64,
}

impl Stored for UploadSession {
    const KIND: Kind = Kind::Record;

    fn to_value(&self) -> Result<Value, StoreError> {
        Value::record(self)
    }

    fn from_value(value: Value) -> Result<Self, StoreError> {
        value.into_record()
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PreMeta {
    #[serde(default)]
    pub part_size: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HashOutcome {
    #[serde(default)]
    pub finish: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Authorization {
    pub auth_key: String,
}

/// Outcome of a part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartOutcome {
    /// The part is stored, with its integrity token.
    Uploaded(String),
    /// The server already holds the whole part set.
    Finished,
}

/// Direct download descriptor of a remote file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct DownloadInfo {
    pub fid: String,
    pub file_name: String,
    #[serde(default)]
    pub size: u64,
    pub download_url: String,
    #[serde(default)]
    pub md5: String,
}

/// Share creation request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ShareRequest {
    pub fid_list: Vec<String>,
    pub title: String,
    /// `1` public, `2` password-protected.
    pub url_type: u8,
    /// `1` forever, `2` one day, `3` seven days, `4` thirty days.
    pub expired_type: u8,
    /// Generated when empty and password-protected.
    pub passcode: String,
}

impl ShareRequest {
    pub const URL_PUBLIC: u8 = 1;
    pub const URL_PASSWORD: u8 = 2;
}

/// Details of a created share.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SharePassword {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pwd_id: String,
    #[serde(default)]
    pub share_url: String,
    #[serde(default)]
    pub url_type: u8,
    #[serde(default)]
    pub passcode: String,
    #[serde(default)]
    pub expired_type: u8,
    #[serde(default)]
    pub file_num: u64,
    #[serde(default)]
    pub expired_at: i64,
}
