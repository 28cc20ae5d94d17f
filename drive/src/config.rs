//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://drive.quark.cn/1/clouddrive";
pub const DEFAULT_REFERER: &str = "https://pan.quark.cn";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                                      quark-cloud-drive/2.5.20 Chrome/100.0.4896.160 Electron/18.3.5.4-b478491100 Safari/537.36 \
                                      Channel/pckk_other_ch";
/// User agent both sent to and signed for the object storage endpoint.
pub const DEFAULT_STORAGE_USER_AGENT: &str = "aliyun-sdk-js/6.6.1 Chrome 98.0.4758.80 on Windows 10 64-bit";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_STORE_BUDGET: usize = 10 * 1_024 * 1_024;

/// Configuration shared by a [`Client`](crate::Client) and its HTTP API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Drive API base URL, every endpoint path is appended to it.
    pub base_url: String,
    pub referer: String,
    pub user_agent: String,
    pub storage_user_agent: String,
    /// Per-request timeout, parts and downloads included.
    pub timeout: Duration,
    /// Page size used when listing a remote directory.
    pub page_size: u32,
    /// Root directory of the persistent progress store.
    pub store_dir: PathBuf,
    /// Byte budget of the store in-memory read cache.
    pub store_budget: usize,
    /// Upper bound on a single task wait, unbounded when `None`.
    pub task_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            referer: DEFAULT_REFERER.to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            storage_user_agent: DEFAULT_STORAGE_USER_AGENT.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            store_dir: std::env::temp_dir().join("drive-cache"),
            store_budget: DEFAULT_STORE_BUDGET,
            task_timeout: None,
        }
    }

    #[inline]
    pub fn with_referer(self, referer: impl Into<String>) -> Self {
        Self {
            referer: referer.into(),
            ..self
        }
    }

    #[inline]
    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..self
        }
    }

    #[inline]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Set the listing page size, a zero size is bumped to 1.
    #[inline]
    pub fn with_page_size(self, page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            ..self
        }
    }

    #[inline]
    pub fn with_store_dir(self, store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            ..self
        }
    }

    #[inline]
    pub fn with_store_budget(self, store_budget: usize) -> Self {
        Self { store_budget, ..self }
    }

    #[inline]
    pub fn with_task_timeout(self, task_timeout: Duration) -> Self {
        Self {
            task_timeout: Some(task_timeout),
            ..self
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}
