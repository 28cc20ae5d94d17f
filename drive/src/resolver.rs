//! Remote path resolution.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::api::{DriveApi, Entry};
use crate::task::cancellable;
use crate::Error;

/// Identifier of the remote root directory.
pub const ROOT_ID: &str = "0";

/// Cached listings of remote directories, by parent id.
#[derive(Debug, Default)]
pub struct DirCache {
    listings: RwLock<HashMap<String, Arc<[Entry]>>>,
}

impl DirCache {
    pub fn get(&self, parent: &str) -> Option<Arc<[Entry]>> {
        self.listings.read().unwrap_or_else(PoisonError::into_inner).get(parent).cloned()
    }

    pub fn insert(&self, parent: &str, entries: Arc<[Entry]>) {
        self.listings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(parent.to_owned(), entries);
    }

    /// Drop the listing of `parent`, stale once a child was created under it.
    pub fn invalidate(&self, parent: &str) {
        self.listings.write().unwrap_or_else(PoisonError::into_inner).remove(parent);
    }

    pub fn clear(&self) {
        self.listings.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.listings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a path segment names a file, ie. carries an extension.
#[inline]
fn is_file_segment(segment: &str) -> bool {
    segment.contains('.')
}

/// Maps slash-delimited remote paths onto remote ids, creating missing directories on demand.
#[derive(Debug)]
pub struct PathResolver<'a, A> {
    api: &'a A,
    cache: &'a DirCache,
    cancel: CancellationToken,
    page_size: u32,
}

impl<'a, A: DriveApi> PathResolver<'a, A> {
    pub fn new(api: &'a A, cache: &'a DirCache, cancel: CancellationToken, page_size: u32) -> Self {
        Self {
            api,
            cache,
            cancel,
            page_size: page_size.max(1),
        }
    }

    /// Resolve `path` to the id of its last segment, the root path resolving to [`ROOT_ID`].
    ///
    /// Missing directory segments are created when `create_missing` is set, missing file segments (with an extension)
    /// always fail with [`Error::NotFound`]. Cached listings are only read when `use_cache` is set, though fetched
    /// listings are always cached.
    pub async fn resolve(&self, path: &str, create_missing: bool, use_cache: bool) -> Result<String, Error> {
        let mut parent = ROOT_ID.to_owned();
        let mut resolved = String::new();

        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            resolved.push('/');
            resolved.push_str(segment);

            let listing = self.list(&parent, use_cache).await?;

            if let Some(entry) = listing.iter().find(|entry| entry.file_name == segment) {
                parent = entry.fid.clone();
                continue;
            }

            if is_file_segment(segment) || !create_missing {
                return Err(Error::NotFound(resolved));
            }

            let fid = cancellable(&self.cancel, self.api.create_dir(segment, &parent)).await?;
            tracing::debug!("Created remote directory `{resolved}` ({fid})");

            self.cache.invalidate(&parent);
            parent = fid;
        }

        Ok(parent)
    }

    /// List the children of `parent`, from the cache when allowed and available.
    pub async fn list(&self, parent: &str, use_cache: bool) -> Result<Arc<[Entry]>, Error> {
        if use_cache {
            if let Some(listing) = self.cache.get(parent) {
                tracing::trace!("Directory cache hit for `{parent}`");
                return Ok(listing);
            }
        }

        tracing::trace!("Directory cache miss for `{parent}`");

        let listing: Arc<[Entry]> = self.fetch(parent).await?.into();
        self.cache.insert(parent, Arc::clone(&listing));

        Ok(listing)
    }

    async fn fetch(&self, parent: &str) -> Result<Vec<Entry>, Error> {
        let mut entries = Vec::new();
        let mut page = 1u32;

        loop {
            let (list, total) = cancellable(&self.cancel, self.api.list_page(parent, page, self.page_size)).await?;
            let exhausted = list.is_empty();
            entries.extend(list);

            if exhausted || u64::from(page) * u64::from(self.page_size) >= total {
                break;
            }

            page += 1;
        }

        Ok(entries)
    }
}
