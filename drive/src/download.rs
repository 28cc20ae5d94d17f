use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::TryStreamExt;
use tokio::{fs, io};

use crate::api::{DownloadBody, DriveApi};
use crate::client::Client;
use crate::progress::{Meter, ProgressFn};
use crate::store::KvStore;
use crate::task::cancellable;
use crate::Error;

const TEMP_EXT: &str = "tmp";

/// Sibling of `path` receiving the body until the download completes.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TEMP_EXT);
    PathBuf::from(name)
}

/// Callback receiving the local directory and the absolute path of a completed download.
pub type CompletionFn = Arc<dyn Fn(&Path, &Path) + Send + Sync>;

#[derive(Clone, Default)]
pub struct DownloadOptions {
    pub progress: Option<ProgressFn>,
    pub on_complete: Option<CompletionFn>,
}

impl DownloadOptions {
    #[inline]
    pub fn with_progress(self, progress: ProgressFn) -> Self {
        Self {
            progress: Some(progress),
            ..self
        }
    }

    #[inline]
    pub fn with_completion(self, on_complete: CompletionFn) -> Self {
        Self {
            on_complete: Some(on_complete),
            ..self
        }
    }
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("progress", &self.progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl<A: DriveApi, S: KvStore> Client<A, S> {
    /// Download the remote file `fid` into `local_dir`, under its remote name, and return its absolute path.
    ///
    /// Single attempt: no resumption, no range requests. The body is written to a `.tmp` sibling first, an existing
    /// local file only being replaced once the whole body is on disk.
    pub async fn download(&self, fid: &str, local_dir: impl AsRef<Path>, options: &DownloadOptions) -> Result<PathBuf, Error> {
        let local_dir = local_dir.as_ref();

        let info = cancellable(&self.cancel(), self.api().download_info(fid)).await?;
        let name = Path::new(&info.file_name)
            .file_name()
            .ok_or_else(|| Error::NotFound(format!("{fid}: `{}`", info.file_name)))?;

        fs::create_dir_all(local_dir).await?;
        let path = local_dir.join(name);

        tracing::debug!("Downloading `{}` to `{}`", info.file_name, path.display());

        let body = cancellable(&self.cancel(), self.api().open_download(&info.download_url)).await?;
        let mut meter = Meter::new(0, body.content_length.unwrap_or(info.size), options.progress.clone());

        let temp = temp_path(&path);

        if let Err(err) = self.write_body(&temp, body, &mut meter).await {
            tracing::trace!("Clean incomplete download: `{}`", temp.display());

            let _ = fs::remove_file(&temp).await;
            return Err(err);
        }

        fs::rename(&temp, &path).await?;

        let path = fs::canonicalize(&path).await?;
        tracing::info!("Downloaded `{}`", path.display());

        if let Some(ref on_complete) = options.on_complete {
            on_complete(local_dir, &path);
        }

        Ok(path)
    }

    async fn write_body(&self, path: &Path, mut body: DownloadBody, meter: &mut Meter) -> Result<(), Error> {
        use io::AsyncWriteExt;

        let file = fs::File::create(path).await?;
        let mut writer = io::BufWriter::new(file);

        while let Some(chunk) = cancellable(&self.cancel(), body.stream.try_next()).await? {
            writer.write_all(&chunk).await?;
            meter.advance(chunk.len() as u64);
        }

        writer.shutdown().await?;
        writer.into_inner().sync_all().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::api::mock::MockApi;
    use crate::config::ClientConfig;
    use crate::progress::Progress;
    use crate::store::MemoryStore;

    fn client() -> Client<MockApi, MemoryStore> {
        Client::new(MockApi::new(), MemoryStore::default(), ClientConfig::default())
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_download() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/downloads");

        let client = client();
        client.api().add_download("f1", "report.pdf", b"0123456789");

        let reported = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(Mutex::new(None));

        let options = DownloadOptions::default()
            .with_progress({
                let reported = Arc::clone(&reported);
                Arc::new(move |progress: Progress| reported.lock().unwrap().push(progress.transferred))
            })
            .with_completion({
                let completed = Arc::clone(&completed);
                Arc::new(move |dir: &Path, path: &Path| *completed.lock().unwrap() = Some((dir.to_path_buf(), path.to_path_buf())))
            });

        let path = client.download("f1", &target, &options).await.unwrap();

        assert!(path.is_absolute());
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");
        assert_eq!(*reported.lock().unwrap(), [3, 6, 9, 10]);
        assert_eq!(*completed.lock().unwrap(), Some((target, path)));
        assert!(logs_contain("Downloaded"));
    }

    #[tokio::test]
    async fn test_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"stale content").unwrap();

        let client = client();
        client.api().add_download("f1", "a.txt", b"fresh");

        let path = client.download("f1", dir.path(), &DownloadOptions::default()).await.unwrap();

        assert_eq!(std::fs::read(path).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_cancelled_stream_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.txt");
        std::fs::write(&target, b"previous good content").unwrap();

        let client = client();
        client.api().add_download("f1", "a.txt", b"0123456789");

        let options = DownloadOptions::default().with_progress({
            let cancel = client.cancel_token();
            Arc::new(move |_: Progress| cancel.cancel())
        });

        let result = client.download("f1", dir.path(), &options).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(std::fs::read(&target).unwrap(), b"previous good content");
        assert!(!temp_path(&target).exists());
    }

    #[tokio::test]
    async fn test_unknown_file() {
        let dir = tempfile::tempdir().unwrap();

        let result = client().download("missing", dir.path(), &DownloadOptions::default()).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let client = client();
        client.api().add_download("f1", "a.txt", b"content");
        client.cancel_token().cancel();

        let result = client.download("f1", dir.path(), &DownloadOptions::default()).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!dir.path().join("a.txt").exists());
    }
}
