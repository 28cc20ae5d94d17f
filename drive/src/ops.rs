//! Task-backed remote file operations.

use rand::Rng;

use crate::api::{DriveApi, SharePassword, ShareRequest, TaskHandle};
use crate::client::Client;
use crate::store::KvStore;
use crate::task::cancellable;
use crate::Error;

const PASSCODE_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const PASSCODE_LEN: usize = 4;

/// Random 4-letter share passcode.
fn passcode() -> String {
    let mut rng = rand::rng();

    (0..PASSCODE_LEN)
        .map(|_| PASSCODE_LETTERS[rng.random_range(0..PASSCODE_LETTERS.len())] as char)
        .collect()
}

impl<A: DriveApi, S: KvStore> Client<A, S> {
    /// Move `fids` into the directory `dest` and wait for completion.
    pub async fn move_files(&self, fids: &[String], dest: &str) -> Result<TaskHandle, Error> {
        let handle = cancellable(&self.cancel(), self.api().move_files(fids, dest)).await?;
        self.dir_cache().clear();
        self.wait_task(handle).await
    }

    pub async fn rename(&self, fid: &str, name: &str) -> Result<TaskHandle, Error> {
        let handle = cancellable(&self.cancel(), self.api().rename(fid, name)).await?;
        self.dir_cache().clear();
        self.wait_task(handle).await
    }

    pub async fn delete_files(&self, fids: &[String]) -> Result<TaskHandle, Error> {
        let handle = cancellable(&self.cancel(), self.api().delete_files(fids)).await?;
        self.dir_cache().clear();
        self.wait_task(handle).await
    }

    /// Share files and return the share id, read from the completed task.
    ///
    /// A password-protected share without passcode gets a random one.
    pub async fn share(&self, request: &ShareRequest) -> Result<String, Error> {
        let mut request = request.clone();
        if request.url_type == ShareRequest::URL_PASSWORD && request.passcode.is_empty() {
            request.passcode = passcode();
        }

        let handle = cancellable(&self.cancel(), self.api().share(&request)).await?;
        let done = self.wait_task(handle).await?;

        done.task
            .map(|task| task.share_id)
            .filter(|share_id| !share_id.is_empty())
            .ok_or_else(|| Error::api(0, format!("share task `{}` completed without share id", done.task_id)))
    }

    /// Share files, then fetch the resulting share link and passcode.
    pub async fn share_files(&self, request: &ShareRequest) -> Result<SharePassword, Error> {
        let share_id = self.share(request).await?;

        cancellable(&self.cancel(), self.api().share_password(&share_id)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::mock::MockApi;
    use crate::config::ClientConfig;
    use crate::resolver::ROOT_ID;
    use crate::store::MemoryStore;

    fn client() -> Client<MockApi, MemoryStore> {
        Client::new(MockApi::new(), MemoryStore::default(), ClientConfig::default())
    }

    #[test]
    fn test_passcode() {
        let code = passcode();

        assert_eq!(code.len(), PASSCODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_wait_for_tasks() {
        let client = client();
        let fids = vec!["f1".to_owned()];

        client.api().state().task_script.extend([
            MockApi::pending("move-task", Duration::from_millis(100)),
            MockApi::completed("move-task", ""),
        ]);

        let done = client.move_files(&fids, "d1").await.unwrap();
        assert!(done.finished);
        assert_eq!(client.api().state().queries, ["move-task", "move-task"]);

        client.rename("f1", "new.txt").await.unwrap();
        client.delete_files(&fids).await.unwrap();

        assert_eq!(client.api().state().operations, ["move", "rename", "delete"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_clear_dir_cache() {
        let client = client();
        client.api().add_dir(ROOT_ID, "docs");

        client.resolve("/docs", false, true).await.unwrap();
        assert!(!client.dir_cache().is_empty());

        client.rename("f1", "renamed").await.unwrap();
        assert!(client.dir_cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_share_files() {
        let client = client();
        let request = ShareRequest {
            fid_list: vec!["f1".into(), "f2".into()],
            title: "holidays".into(),
            url_type: ShareRequest::URL_PASSWORD,
            expired_type: 1,
            passcode: String::new(),
        };

        let password = client.share_files(&request).await.unwrap();

        assert_eq!(password.pwd_id, "share-1");
        assert_eq!(password.file_num, 2);
        assert_eq!(password.passcode.len(), PASSCODE_LEN);
        assert_eq!(client.api().state().shares[0].passcode, password.passcode);
    }

    #[tokio::test(start_paused = true)]
    async fn test_public_share_keeps_empty_passcode() {
        let client = client();
        let request = ShareRequest {
            fid_list: vec!["f1".into()],
            url_type: ShareRequest::URL_PUBLIC,
            ..Default::default()
        };

        assert_eq!(client.share(&request).await.unwrap(), "share-1");
        assert!(client.api().state().shares[0].passcode.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_share_without_share_id() {
        let client = client();
        client.api().state().task_script.push_back(MockApi::completed("share-task", ""));

        let result = client.share(&ShareRequest::default()).await;

        assert!(matches!(result, Err(Error::Api { .. })));
    }
}
