//! Directory tree uploads.

use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::api::DriveApi;
use crate::client::Client;
use crate::store::KvStore;
use crate::upload::UploadOptions;
use crate::Error;

/// Options of a directory tree upload.
///
/// File filters apply in order: a file whose name is in `ignore_files` or ends with one of `ignore_extensions` is
/// skipped, then, when `extensions` is not empty, any file not ending with one of them is skipped too.
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    /// Options of every single file upload, the directory cache always being used.
    pub upload: UploadOptions,
    /// Extension allow-list, everything is allowed when empty.
    pub extensions: Vec<String>,
    pub ignore_extensions: Vec<String>,
    pub ignore_files: Vec<String>,
    /// Names of the directories not to descend into.
    pub ignore_dirs: Vec<String>,
    /// Log and continue past per-file failures instead of aborting the tree.
    pub skip_errors: bool,
}

impl TreeOptions {
    #[inline]
    pub fn with_upload(self, upload: UploadOptions) -> Self {
        Self { upload, ..self }
    }

    #[inline]
    pub fn with_extensions(self, extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    #[inline]
    pub fn with_ignore_extensions(self, ignore_extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ignore_extensions: ignore_extensions.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    #[inline]
    pub fn with_ignore_files(self, ignore_files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ignore_files: ignore_files.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    #[inline]
    pub fn with_ignore_dirs(self, ignore_dirs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ignore_dirs: ignore_dirs.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    #[inline]
    pub fn skip_errors(self, skip_errors: bool) -> Self {
        Self { skip_errors, ..self }
    }

    /// Whether the file `name` passes the deny-list, then the allow-list.
    pub fn accepts(&self, name: &str) -> bool {
        if self.ignore_files.iter().any(|file| file == name) || self.ignore_extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            return false;
        }

        self.extensions.is_empty() || self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }
}

/// Summary of a directory tree upload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TreeReport {
    pub uploaded: Vec<PathBuf>,
    /// Files left out by the filters.
    pub filtered: Vec<PathBuf>,
    /// Files whose upload failed, when skipping errors.
    pub failed: Vec<(PathBuf, String)>,
}

/// Remote directory of a file found under `relative_dir` of a tree uploaded to `remote_root`.
fn remote_dir(remote_root: &str, relative_dir: &Path) -> String {
    let mut segments: Vec<String> = remote_root
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect();

    segments.extend(relative_dir.components().filter_map(|component| match component {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }));

    format!("/{}", segments.join("/"))
}

impl<A: DriveApi, S: KvStore> Client<A, S> {
    /// Upload every accepted file under `local_root` to `remote_root`, preserving the relative structure.
    ///
    /// The directory cache is cleared first, then shared by every file upload of the tree.
    pub async fn upload_tree(&self, local_root: impl AsRef<Path>, remote_root: &str, options: &TreeOptions) -> Result<TreeReport, Error> {
        let local_root = local_root.as_ref();
        let upload = options.upload.clone().use_dir_cache(true);
        let mut report = TreeReport::default();

        self.dir_cache().clear();

        let mut pending = vec![local_root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = Vec::new();
            let mut read_dir = fs::read_dir(&dir).await?;

            while let Some(entry) = read_dir.next_entry().await? {
                entries.push((entry.path(), entry.file_type().await?.is_dir()));
            }

            entries.sort();

            // Descend depth-first, in name order.
            for (path, _) in entries.iter().rev().filter(|(_, is_dir)| *is_dir) {
                let name = path.file_name().unwrap_or_default().to_string_lossy();

                if options.ignore_dirs.iter().any(|ignored| *ignored == name) {
                    tracing::debug!("Ignoring directory `{}`", path.display());
                } else {
                    pending.push(path.clone());
                }
            }

            for (path, _) in entries.into_iter().filter(|(_, is_dir)| !is_dir) {
                if !options.accepts(&path.file_name().unwrap_or_default().to_string_lossy()) {
                    tracing::trace!("Filtered out `{}`", path.display());
                    report.filtered.push(path);
                    continue;
                }

                let relative_dir = dir.strip_prefix(local_root).unwrap_or(Path::new(""));
                let remote_dir = remote_dir(remote_root, relative_dir);

                match self.upload_file(&path, &remote_dir, &upload).await {
                    Ok(_) => {
                        if upload.delete_on_success {
                            remove_empty_dir(local_root, &dir).await;
                        }
                        report.uploaded.push(path);
                    }
                    Err(err) if options.skip_errors && !matches!(err, Error::Cancelled) => {
                        tracing::warn!("Failed to upload `{}`, skipping: {err}", path.display());
                        report.failed.push((path, err.to_string()));
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        tracing::info!(
            "Uploaded tree `{}` to `{remote_root}`: {} uploaded, {} filtered, {} failed",
            local_root.display(),
            report.uploaded.len(),
            report.filtered.len(),
            report.failed.len()
        );

        Ok(report)
    }
}

/// Remove `dir` and its ancestors as long as they are empty, never removing the tree root.
async fn remove_empty_dir(root: &Path, dir: &Path) {
    let mut dir = dir;

    while dir != root && dir.starts_with(root) {
        let empty = match fs::read_dir(dir).await {
            Ok(mut read_dir) => matches!(read_dir.next_entry().await, Ok(None)),
            Err(_) => false,
        };

        if !empty {
            break;
        }

        if let Err(err) = fs::remove_dir(dir).await {
            tracing::warn!("Failed to remove emptied directory `{}`: {err}", dir.display());
            break;
        }

        tracing::info!("Removed emptied directory `{}`", dir.display());

        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
}
