//! Content fingerprints of local files.
//!
//! A fingerprint is made of a fast MD5 digest and a stronger SHA-1 digest, both hex-encoded lowercase. They are
//! submitted to the drive to let it short-circuit uploads of content it already has, and the MD5 flavour also
//! derives upload session keys.

use std::path::Path;

use md5::{Digest, Md5};
use sha1::Sha1;
use tokio::io::{self, AsyncReadExt};

const BUFFER_SIZE: usize = 1_024 * 1_024;

/// MD5 + SHA-1 digests of a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub md5: String,
    pub sha1: String,
}

impl Fingerprint {
    /// Stream the file at `path` through a 1 MiB buffer and digest it in a single pass.
    ///
    /// I/O errors are returned unchanged.
    pub async fn of_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut buffer = vec![0; BUFFER_SIZE];

        let mut md5 = Md5::new();
        let mut sha1 = Sha1::new();

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }

            md5.update(&buffer[..n]);
            sha1.update(&buffer[..n]);
        }

        Ok(Self {
            md5: hex::encode(md5.finalize()),
            sha1: hex::encode(sha1.finalize()),
        })
    }
}

/// Hex MD5 of an arbitrary string.
pub fn md5_hex(input: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(input))
}

/// Key under which the progress of one `(local file, remote dir)` upload is persisted.
pub fn session_key(local_file: &Path, remote_path: &str, parent_id: &str) -> String {
    md5_hex(format!("{}{remote_path}{parent_id}", local_file.display()))
}

/// Guess a MIME type from a file name extension.
pub fn mime_type(name: &str) -> &'static str {
    let ext = match name.rfind('.') {
        Some(i) => name[i + 1..].to_ascii_lowercase(),
        None => return "application/octet-stream",
    };

    match ext.as_str() {
        "apk" => "application/vnd.android.package-archive",
        "avi" => "video/x-msvideo",
        "css" => "text/css; charset=utf-8",
        "gif" => "image/gif",
        "gz" => "application/gzip",
        "htm" | "html" => "text/html; charset=utf-8",
        "jpeg" | "jpg" => "image/jpeg",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "txt" => "text/plain; charset=utf-8",
        "wasm" => "application/wasm",
        "webm" => "video/webm",
        "webp" => "image/webp",
        "xml" => "text/xml; charset=utf-8",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
