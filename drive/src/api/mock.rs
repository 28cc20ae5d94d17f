//! Scripted in-memory drive, recording every call it serves.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::stream;

use super::*;

pub(crate) const MOCK_UPLOAD_URL: &str = "http://pds.example.com";

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Children of every remote directory, by parent id.
    pub dirs: HashMap<String, Vec<Entry>>,
    next_id: u64,
    /// `(parent, page)` of every listing request.
    pub listings: Vec<(String, u32)>,
    /// `(name, parent)` of every created directory.
    pub created: Vec<(String, String)>,
    pub registered: Vec<PreRegister>,
    pub part_size: u64,
    pub hash_finished: bool,
    /// Part number answered with the `finish` marker.
    pub finish_at_part: Option<u32>,
    /// Part number failing with a storage error.
    pub fail_at_part: Option<u32>,
    pub auth_metas: Vec<String>,
    /// `(part number, body length)` of every stored part.
    pub parts: Vec<(u32, usize)>,
    pub commits: Vec<CommitUpload>,
    /// `(object key, task id)` of every finish call.
    pub finishes: Vec<(String, String)>,
    /// Handles served by successive task queries, a finished task once exhausted.
    pub task_script: VecDeque<TaskHandle>,
    pub queries: Vec<String>,
    /// Name of every task-backed operation called.
    pub operations: Vec<String>,
    pub shares: Vec<ShareRequest>,
    /// File name and content by fid.
    pub downloads: HashMap<String, (String, Vec<u8>)>,
}

pub(crate) struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                part_size: 10 * 1_024 * 1_024,
                ..Default::default()
            }),
        }
    }

    pub fn with_part_size(self, part_size: u64) -> Self {
        self.state().part_size = part_size;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_dir(&self, parent: &str, name: &str) -> String {
        self.state().add(parent, name, true)
    }

    pub fn add_file(&self, parent: &str, name: &str) -> String {
        self.state().add(parent, name, false)
    }

    pub fn add_download(&self, fid: &str, name: &str, content: &[u8]) {
        self.state().downloads.insert(fid.to_owned(), (name.to_owned(), content.to_vec()));
    }

    pub fn pending(task_id: &str, poll_interval: Duration) -> TaskHandle {
        TaskHandle {
            task_id: task_id.to_owned(),
            finished: false,
            poll_interval,
            task: None,
        }
    }

    pub fn completed(task_id: &str, share_id: &str) -> TaskHandle {
        TaskHandle {
            task_id: task_id.to_owned(),
            finished: true,
            poll_interval: Duration::ZERO,
            task: Some(Task {
                task_id: task_id.to_owned(),
                status: Task::STATUS_FINISHED,
                share_id: share_id.to_owned(),
                ..Default::default()
            }),
        }
    }

    fn operation(&self, name: &str) -> TaskHandle {
        self.state().operations.push(name.to_owned());
        Self::pending(&format!("{name}-task"), Duration::from_millis(10))
    }
}

impl MockState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn add(&mut self, parent: &str, name: &str, dir: bool) -> String {
        let fid = self.id(if dir { "dir" } else { "file" });

        self.dirs.entry(parent.to_owned()).or_default().push(Entry {
            fid: fid.clone(),
            file_name: name.to_owned(),
            pdir_fid: parent.to_owned(),
            dir,
            file: !dir,
            ..Default::default()
        });

        fid
    }

    /// Names of the directories created so far, in order.
    pub fn created_names(&self) -> Vec<&str> {
        self.created.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Part numbers of the stored parts, in order.
    pub fn part_numbers(&self) -> Vec<u32> {
        self.parts.iter().map(|(n, _)| *n).collect()
    }
}

impl DriveApi for MockApi {
    async fn list_page(&self, parent: &str, page: u32, size: u32) -> Result<(Vec<Entry>, u64), Error> {
        let mut state = self.state();
        state.listings.push((parent.to_owned(), page));

        let children = state.dirs.get(parent).cloned().unwrap_or_default();
        let start = (page.saturating_sub(1) * size) as usize;
        let list = children.iter().skip(start).take(size as usize).cloned().collect();

        Ok((list, children.len() as u64))
    }

    async fn create_dir(&self, name: &str, parent: &str) -> Result<String, Error> {
        let mut state = self.state();
        state.created.push((name.to_owned(), parent.to_owned()));

        Ok(state.add(parent, name, true))
    }

    async fn pre_register(&self, request: &PreRegister) -> Result<UploadSession, Error> {
        let mut state = self.state();
        state.registered.push(request.clone());
        let n = state.registered.len();

        Ok(UploadSession {
            task_id: format!("task-{n}"),
            upload_id: format!("upload-{n}"),
            obj_key: format!("obj-{n}"),
            upload_url: MOCK_UPLOAD_URL.to_owned(),
            fid: format!("uploaded-{n}"),
            bucket: "bucket".to_owned(),
            callback: UploadCallback {
                callback_url: "https://callback.example.com".to_owned(),
                callback_body: "body".to_owned(),
            },
            format_type: request.mime_type.clone(),
            size: request.size,
            auth_info: "auth-info".to_owned(),
            part_size: state.part_size,
            ..Default::default()
        })
    }

    async fn submit_hash(&self, _fingerprint: &Fingerprint, _task_id: &str) -> Result<bool, Error> {
        Ok(self.state().hash_finished)
    }

    async fn authorize(&self, _auth_info: &str, auth_meta: &str, _task_id: &str) -> Result<String, Error> {
        let mut state = self.state();
        state.auth_metas.push(auth_meta.to_owned());

        Ok(format!("OSS signed-{}", state.auth_metas.len()))
    }

    async fn put_part(&self, part: PartUpload) -> Result<PartOutcome, Error> {
        let mut state = self.state();

        if state.fail_at_part == Some(part.part_number) {
            return Err(Error::Status {
                status: 503,
                body: "unavailable".to_owned(),
            });
        }
        if state.finish_at_part == Some(part.part_number) {
            return Ok(PartOutcome::Finished);
        }

        state.parts.push((part.part_number, part.body.len()));

        Ok(PartOutcome::Uploaded(format!("\"etag-{}\"", part.part_number)))
    }

    async fn commit(&self, commit: CommitUpload) -> Result<(), Error> {
        self.state().commits.push(commit);
        Ok(())
    }

    async fn finish(&self, obj_key: &str, task_id: &str) -> Result<(), Error> {
        self.state().finishes.push((obj_key.to_owned(), task_id.to_owned()));
        Ok(())
    }

    async fn query_task(&self, task_id: &str) -> Result<TaskHandle, Error> {
        let mut state = self.state();
        state.queries.push(task_id.to_owned());

        Ok(state
            .task_script
            .pop_front()
            .unwrap_or_else(|| Self::completed(task_id, "share-1")))
    }

    async fn download_info(&self, fid: &str) -> Result<DownloadInfo, Error> {
        let state = self.state();
        let (name, content) = state.downloads.get(fid).ok_or_else(|| Error::NotFound(fid.to_owned()))?;

        Ok(DownloadInfo {
            fid: fid.to_owned(),
            file_name: name.clone(),
            size: content.len() as u64,
            download_url: format!("mock://{fid}"),
            md5: String::new(),
        })
    }

    async fn open_download(&self, url: &str) -> Result<DownloadBody, Error> {
        let fid = url.trim_start_matches("mock://");
        let content = self
            .state()
            .downloads
            .get(fid)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| Error::NotFound(url.to_owned()))?;

        let chunks: Vec<Result<Bytes, Error>> = content.chunks(3).map(|chunk| Ok(Bytes::copy_from_slice(chunk))).collect();

        Ok(DownloadBody {
            content_length: Some(content.len() as u64),
            stream: Box::pin(stream::iter(chunks)),
        })
    }

    async fn move_files(&self, _fids: &[String], _dest: &str) -> Result<TaskHandle, Error> {
        Ok(self.operation("move"))
    }

    async fn rename(&self, _fid: &str, _name: &str) -> Result<TaskHandle, Error> {
        Ok(self.operation("rename"))
    }

    async fn delete_files(&self, _fids: &[String]) -> Result<TaskHandle, Error> {
        Ok(self.operation("delete"))
    }

    async fn share(&self, request: &ShareRequest) -> Result<TaskHandle, Error> {
        self.state().shares.push(request.clone());
        Ok(self.operation("share"))
    }

    async fn share_password(&self, share_id: &str) -> Result<SharePassword, Error> {
        let state = self.state();
        let request = state.shares.last().cloned().unwrap_or_default();

        Ok(SharePassword {
            title: request.title,
            pwd_id: share_id.to_owned(),
            share_url: format!("https://pan.example.com/s/{share_id}"),
            url_type: request.url_type,
            passcode: request.passcode,
            expired_type: request.expired_type,
            file_num: request.fid_list.len() as u64,
            expired_at: 0,
        })
    }
}
