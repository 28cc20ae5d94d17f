use std::collections::HashSet;
use std::sync::{Mutex, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::api::{Credentials, DriveApi, HttpDriveApi, TaskHandle};
use crate::config::ClientConfig;
use crate::resolver::{DirCache, PathResolver};
use crate::store::{DiskStore, KvStore, StoreExt, Stored};
use crate::task::TaskWaiter;
use crate::Error;

/// A drive client, owning every piece of state its transfers share.
///
/// The directory cache, the progress store, the cancellation tokens and the set of active upload sessions are all
/// scoped to one client, so independent clients never interfere with each other.
///
/// Operations run under a child of the client's root token, see [`Client::cancel_token()`] and
/// [`Client::reset_cancel_token()`].
pub struct Client<A, S = DiskStore> {
    api: A,
    store: S,
    config: ClientConfig,
    dirs: DirCache,
    root: CancellationToken,
    cancel: RwLock<CancellationToken>,
    sessions: Mutex<HashSet<String>>,
}

impl Client<HttpDriveApi, DiskStore> {
    /// Connect to the drive API over HTTP, persisting upload progress under [`ClientConfig::store_dir`].
    pub fn connect(config: ClientConfig, credentials: Credentials) -> Result<Self, Error> {
        let api = HttpDriveApi::new(&config, credentials)?;
        let store = DiskStore::open(&config.store_dir, config.store_budget)?;

        Ok(Self::new(api, store, config))
    }
}

impl<A: DriveApi, S: KvStore> Client<A, S> {
    pub fn new(api: A, store: S, config: ClientConfig) -> Self {
        let root = CancellationToken::new();

        Self {
            api,
            store,
            config,
            dirs: DirCache::default(),
            cancel: RwLock::new(root.child_token()),
            root,
            sessions: Mutex::default(),
        }
    }

    /// Run every operation of this client under `root`, typically a child of an application-wide token.
    ///
    /// Cancelling `root` cancels the client for good, resets included.
    pub fn with_cancel_token(self, root: CancellationToken) -> Self {
        Self {
            cancel: RwLock::new(root.child_token()),
            root,
            ..self
        }
    }

    #[inline]
    pub fn api(&self) -> &A {
        &self.api
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[inline]
    pub fn dir_cache(&self) -> &DirCache {
        &self.dirs
    }

    /// Token cancelling the pending operations of this client, and any later one until
    /// [`Client::reset_cancel_token()`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel()
    }

    /// Replace a cancelled operation token with a fresh child of the root token, and return it.
    ///
    /// Meant to be called once the cancelled operations returned: a call still running keeps observing whichever
    /// token is current at each of its steps.
    pub fn reset_cancel_token(&self) -> CancellationToken {
        let mut cancel = self.cancel.write().unwrap_or_else(PoisonError::into_inner);

        if cancel.is_cancelled() {
            *cancel = self.root.child_token();
            tracing::debug!("Cancellation token reset");
        }

        cancel.clone()
    }

    #[inline]
    pub(crate) fn cancel(&self) -> CancellationToken {
        self.cancel.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn resolver(&self) -> PathResolver<'_, A> {
        PathResolver::new(&self.api, &self.dirs, self.cancel(), self.config.page_size)
    }

    /// Resolve a remote path to its id, see [`PathResolver::resolve()`].
    pub async fn resolve(&self, path: &str, create_missing: bool, use_cache: bool) -> Result<String, Error> {
        self.resolver().resolve(path, create_missing, use_cache).await
    }

    /// Resolve a remote path to its id without creating anything, bypassing the directory cache.
    pub async fn file_id(&self, path: &str) -> Result<String, Error> {
        self.resolve(path, false, false).await
    }

    /// Wait for a task to complete, bounded by [`ClientConfig::task_timeout`].
    pub async fn wait_task(&self, handle: TaskHandle) -> Result<TaskHandle, Error> {
        let cancel = self.cancel();

        TaskWaiter::new(&self.api, &cancel)
            .with_timeout(self.config.task_timeout)
            .wait(handle)
            .await
    }

    /// Mark the upload session `key` active until the returned guard drops.
    pub(crate) fn claim_session(&self, key: &str) -> Result<SessionGuard<'_>, Error> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        if !sessions.insert(key.to_owned()) {
            return Err(Error::SessionBusy(key.to_owned()));
        }

        Ok(SessionGuard {
            sessions: &self.sessions,
            key: key.to_owned(),
        })
    }

    /// Best-effort progress read, failures are logged and read as absent.
    pub(crate) fn cached<T: Stored>(&self, key: &str) -> Option<T> {
        self.store.load(key).unwrap_or_else(|err| {
            tracing::warn!("Failed to read `{key}` from progress store: {err}");
            None
        })
    }

    /// Best-effort progress write.
    pub(crate) fn cache<T: Stored>(&self, key: &str, value: &T) {
        if let Err(err) = self.store.save(key, value) {
            tracing::warn!("Failed to write `{key}` to progress store: {err}");
        }
    }

    /// Best-effort progress removal.
    pub(crate) fn uncache(&self, key: &str) {
        if let Err(err) = self.store.delete(key) {
            tracing::warn!("Failed to delete `{key}` from progress store: {err}");
        }
    }
}

pub(crate) struct SessionGuard<'a> {
    sessions: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}
