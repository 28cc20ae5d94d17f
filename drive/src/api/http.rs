use std::sync::{Arc, PoisonError, RwLock};

use futures::{StreamExt, TryStreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use super::*;
use crate::config::ClientConfig;

const COMMON_QUERY: [(&str, &str); 2] = [("pr", "ucpro"), ("fr", "pc")];
const PUS: &str = "__pus";
const PUUS: &str = "__puus";
/// `ETag` value of a part the server reports as already complete.
const FINISH_ETAG: &str = "finish";

/// Session cookies of the drive API.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub pus: String,
    pub puus: String,
}

/// Callback receiving refreshed credentials.
pub type RefreshFn = Arc<dyn Fn(&Credentials) + Send + Sync>;

impl Credentials {
    pub fn new(pus: impl Into<String>, puus: impl Into<String>) -> Self {
        Self {
            pus: pus.into(),
            puus: puus.into(),
        }
    }

    fn cookie(&self) -> String {
        format!("{PUS}={}; {PUUS}={}", self.pus, self.puus)
    }

    /// Return updated credentials when the response `headers` set new session cookies.
    pub fn refreshed(&self, headers: &HeaderMap) -> Option<Credentials> {
        let mut next = self.clone();

        for value in headers.get_all(header::SET_COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let pair = value.split(';').next().unwrap_or_default();
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };

            match name.trim() {
                PUS => next.pus = value.trim().to_owned(),
                PUUS => next.puus = value.trim().to_owned(),
                _ => {}
            }
        }

        (next != *self).then_some(next)
    }
}

/// HTTP implementation of [`DriveApi`].
///
/// Drive endpoints are called with the session cookies, storage endpoints and downloads with a bare client. After
/// every drive response, refreshed cookies are written back before the next request reads them.
pub struct HttpDriveApi {
    session: reqwest::Client,
    storage: reqwest::Client,
    base_url: String,
    storage_referer: String,
    storage_user_agent: String,
    credentials: RwLock<Credentials>,
    on_refresh: Option<RefreshFn>,
}

impl HttpDriveApi {
    pub fn new(config: &ClientConfig, credentials: Credentials) -> Result<Self, Error> {
        let header_value = |value: &str| HeaderValue::from_str(value).map_err(|_| Error::Config(format!("invalid header value `{value}`")));

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, header_value(&config.user_agent)?);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(header::REFERER, header_value(&config.referer)?);

        let session = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        let storage = reqwest::Client::builder().timeout(config.timeout).build()?;

        url::Url::parse(&config.base_url).map_err(|err| Error::Config(format!("base url: {err}")))?;

        Ok(Self {
            session,
            storage,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            storage_referer: format!("{}/", config.referer.trim_end_matches('/')),
            storage_user_agent: config.storage_user_agent.clone(),
            credentials: RwLock::new(credentials),
            on_refresh: None,
        })
    }

    /// Invoke `on_refresh` whenever the server rotates the session cookies.
    #[inline]
    pub fn with_refresh_hook(self, on_refresh: RefreshFn) -> Self {
        Self {
            on_refresh: Some(on_refresh),
            ..self
        }
    }

    /// Current session cookies.
    pub fn credentials(&self) -> Credentials {
        self.credentials.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, Error> {
        self.send(self.session.get(self.url(path)).query(query)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, Error> {
        self.send(self.session.post(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Error> {
        let cookie = self.credentials.read().unwrap_or_else(PoisonError::into_inner).cookie();

        let response = request.query(&COMMON_QUERY).header(header::COOKIE, cookie).send().await?;

        self.apply_refresh(response.headers());

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(match serde_json::from_slice::<Envelope<serde_json::Value>>(&body) {
                Ok(envelope) => Error::api(envelope.code, envelope.message),
                Err(_) => Error::Status {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                },
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }

    fn apply_refresh(&self, headers: &HeaderMap) {
        let refreshed = self.credentials.read().unwrap_or_else(PoisonError::into_inner).refreshed(headers);

        if let Some(credentials) = refreshed {
            tracing::debug!("Session cookies refreshed");

            if let Some(ref on_refresh) = self.on_refresh {
                on_refresh(&credentials);
            }

            *self.credentials.write().unwrap_or_else(PoisonError::into_inner) = credentials;
        }
    }

    async fn task<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<TaskHandle, Error> {
        let envelope: Envelope<TaskDoing, TaskMeta> = self.post(path, body).await?;
        let (doing, meta) = envelope.into_parts()?;

        Ok(TaskHandle::pending(doing, meta))
    }

    async fn storage_status(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = response.status();

        if status == StatusCode::OK {
            Ok(response)
        } else {
            Err(Error::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

impl DriveApi for HttpDriveApi {
    async fn list_page(&self, parent: &str, page: u32, size: u32) -> Result<(Vec<Entry>, u64), Error> {
        let (page, size) = (page.to_string(), size.to_string());
        let query = [("pdir_fid", parent), ("_page", page.as_str()), ("_size", size.as_str()), ("_fetch_total", "1")];

        let envelope: Envelope<EntryList, PageMeta> = self.get("/file/sort", &query).await?;
        let (list, meta) = envelope.into_parts()?;

        Ok((list.list, meta.total))
    }

    async fn create_dir(&self, name: &str, parent: &str) -> Result<String, Error> {
        let body = json!({
            "dir_init_lock": false,
            "dir_path": "",
            "file_name": name,
            "pdir_fid": parent,
        });

        let envelope: Envelope<CreatedDir> = self.post("/file", &body).await?;

        Ok(envelope.into_data()?.fid)
    }

    async fn pre_register(&self, request: &PreRegister) -> Result<UploadSession, Error> {
        let now = chrono::Utc::now().timestamp_millis();
        let body = json!({
            "ccp_hash_update": true,
            "dir_name": "",
            "file_name": request.file_name,
            "format_type": request.mime_type,
            "l_created_at": now,
            "l_updated_at": now,
            "pdir_fid": request.parent_id,
            "size": request.size,
        });

        let envelope: Envelope<UploadSession, PreMeta> = self.post("/file/upload/pre", &body).await?;
        let (session, meta) = envelope.into_parts()?;

        Ok(UploadSession {
            part_size: meta.part_size,
            ..session
        })
    }

    async fn submit_hash(&self, fingerprint: &Fingerprint, task_id: &str) -> Result<bool, Error> {
        let body = json!({
            "md5": fingerprint.md5,
            "sha1": fingerprint.sha1,
            "task_id": task_id,
        });

        let envelope: Envelope<HashOutcome> = self.post("/file/update/hash", &body).await?;

        Ok(envelope.into_data()?.finish)
    }

    async fn authorize(&self, auth_info: &str, auth_meta: &str, task_id: &str) -> Result<String, Error> {
        let body = json!({
            "auth_info": auth_info,
            "auth_meta": auth_meta,
            "task_id": task_id,
        });

        let envelope: Envelope<Authorization> = self.post("/file/upload/auth", &body).await?;

        Ok(envelope.into_data()?.auth_key)
    }

    async fn put_part(&self, part: PartUpload) -> Result<PartOutcome, Error> {
        let part_number = part.part_number.to_string();

        let response = self
            .storage
            .put(part.url)
            .query(&[("partNumber", part_number.as_str()), ("uploadId", part.upload_id.as_str())])
            .header(header::AUTHORIZATION, part.authorization)
            .header(header::CONTENT_TYPE, part.content_type)
            .header(header::REFERER, &self.storage_referer)
            .header("x-oss-date", part.date)
            .header("x-oss-user-agent", &self.storage_user_agent)
            .body(part.body)
            .send()
            .await?;

        let response = Self::storage_status(response).await?;

        match response.headers().get(header::ETAG).map(HeaderValue::to_str) {
            Some(Ok(FINISH_ETAG)) => Ok(PartOutcome::Finished),
            Some(Ok(etag)) => Ok(PartOutcome::Uploaded(etag.to_owned())),
            _ => Err(Error::Status {
                status: response.status().as_u16(),
                body: format!("part {part_number} acknowledged without ETag"),
            }),
        }
    }

    async fn commit(&self, commit: CommitUpload) -> Result<(), Error> {
        let response = self
            .storage
            .post(commit.url)
            .query(&[("uploadId", commit.upload_id.as_str())])
            .header(header::AUTHORIZATION, commit.authorization)
            .header("Content-MD5", commit.content_md5)
            .header(header::CONTENT_TYPE, crate::oss::MANIFEST_CONTENT_TYPE)
            .header(header::REFERER, &self.storage_referer)
            .header("x-oss-callback", commit.callback)
            .header("x-oss-date", commit.date)
            .header("x-oss-user-agent", &self.storage_user_agent)
            .body(commit.body)
            .send()
            .await?;

        Self::storage_status(response).await.map(drop)
    }

    async fn finish(&self, obj_key: &str, task_id: &str) -> Result<(), Error> {
        let body = json!({
            "obj_key": obj_key,
            "task_id": task_id,
        });

        let envelope: Envelope<serde_json::Value> = self.post("/file/upload/finish", &body).await?;

        envelope.check()
    }

    async fn query_task(&self, task_id: &str) -> Result<TaskHandle, Error> {
        let envelope: Envelope<Task, TaskMeta> = self.get("/task", &[("task_id", task_id)]).await?;
        let (task, meta) = envelope.into_parts()?;

        Ok(TaskHandle::queried(task, meta))
    }

    async fn download_info(&self, fid: &str) -> Result<DownloadInfo, Error> {
        let envelope: Envelope<Vec<DownloadInfo>> = self.post("/file/download", &json!({ "fids": [fid] })).await?;

        envelope
            .into_data()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(fid.to_owned()))
    }

    async fn open_download(&self, url: &str) -> Result<DownloadBody, Error> {
        let response = self.storage.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(DownloadBody {
            content_length: response.content_length(),
            stream: response.bytes_stream().err_into().boxed(),
        })
    }

    async fn move_files(&self, fids: &[String], dest: &str) -> Result<TaskHandle, Error> {
        let body = json!({
            "action_type": 2,
            "exclude_fids": [],
            "filelist": fids,
            "to_pdir_fid": dest,
        });

        self.task("/file/move", &body).await
    }

    async fn rename(&self, fid: &str, name: &str) -> Result<TaskHandle, Error> {
        self.task("/file/rename", &json!({ "fid": fid, "file_name": name })).await
    }

    async fn delete_files(&self, fids: &[String]) -> Result<TaskHandle, Error> {
        let body = json!({
            "action_type": 2,
            "exclude_fids": [],
            "filelist": fids,
        });

        self.task("/file/delete", &body).await
    }

    async fn share(&self, request: &ShareRequest) -> Result<TaskHandle, Error> {
        self.task("/share", request).await
    }

    async fn share_password(&self, share_id: &str) -> Result<SharePassword, Error> {
        let envelope: Envelope<SharePassword> = self.post("/share/password", &json!({ "share_id": share_id })).await?;

        envelope.into_data()
    }
}
