//! Object storage request signing.
//!
//! Parts and the final multipart commit go straight to the vendor object storage endpoint. Each request is signed
//! by the drive API from a canonical string-to-sign, which must be reproduced byte for byte:
//!
//! ```text
//!     PUT                                         POST
//!                                                 {content-md5}
//!     {content-type}                              application/xml
//!     {date}                                      {date}
//!     x-oss-date:{date}                           x-oss-callback:{callback}
//!     x-oss-user-agent:{user-agent}               x-oss-date:{date}
//!     /{bucket}/{key}?partNumber={n}&uploadId={id}   x-oss-user-agent:{user-agent}
//!                                                 /{bucket}/{key}?uploadId={id}
//! ```

use base64::prelude::*;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use url::Url;

use crate::api::UploadSession;
use crate::Error;

pub const MANIFEST_CONTENT_TYPE: &str = "application/xml";

/// A signed part upload.
#[derive(Debug, Clone)]
pub struct PartUpload {
    pub url: Url,
    pub authorization: String,
    pub content_type: String,
    pub date: String,
    pub part_number: u32,
    pub upload_id: String,
    pub body: Bytes,
}

/// A signed multipart commit.
#[derive(Debug, Clone)]
pub struct CommitUpload {
    pub url: Url,
    pub authorization: String,
    pub content_md5: String,
    /// Base64 JSON callback descriptor.
    pub callback: String,
    pub date: String,
    pub upload_id: String,
    pub body: String,
}

/// RFC 1123 date, as expected in `x-oss-date`.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Object URL of the session: `https://{bucket}.{upload host}/{object key}`.
pub fn object_url(session: &UploadSession) -> Result<Url, Error> {
    let invalid = || Error::InvalidUploadUrl(session.upload_url.clone());

    let base = Url::parse(&session.upload_url).map_err(|_| invalid())?;
    let host = base.host_str().filter(|host| !host.is_empty()).ok_or_else(invalid)?;
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    let path = base.path().trim_end_matches('/');

    Url::parse(&format!("https://{}.{authority}{path}/{}", session.bucket, session.obj_key)).map_err(|_| invalid())
}

pub fn part_auth_meta(session: &UploadSession, content_type: &str, date: &str, user_agent: &str, part_number: u32) -> String {
    format!(
        "PUT\n\n{content_type}\n{date}\nx-oss-date:{date}\nx-oss-user-agent:{user_agent}\n/{}/{}?partNumber={part_number}&uploadId={}",
        session.bucket, session.obj_key, session.upload_id
    )
}

pub fn commit_auth_meta(session: &UploadSession, content_md5: &str, callback: &str, date: &str, user_agent: &str) -> String {
    format!(
        "POST\n{content_md5}\n{MANIFEST_CONTENT_TYPE}\n{date}\nx-oss-callback:{callback}\nx-oss-date:{date}\nx-oss-user-agent:{user_agent}\n/{}/{}?uploadId={}",
        session.bucket, session.obj_key, session.upload_id
    )
}

/// XML commit manifest listing `(part number, etag)` pairs, part numbers starting at 1.
pub fn manifest(etags: &[String]) -> String {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CompleteMultipartUpload>\n");

    for (i, etag) in etags.iter().enumerate() {
        body.push_str(&format!("<Part>\n<PartNumber>{}</PartNumber>\n<ETag>{etag}</ETag>\n</Part>\n", i + 1));
    }

    body.push_str("</CompleteMultipartUpload>");
    body
}

/// Base64 MD5 of `body`, as expected in `Content-MD5`.
pub fn content_md5(body: &[u8]) -> String {
    BASE64_STANDARD.encode(Md5::digest(body))
}

/// Base64 JSON of the session callback descriptor.
pub fn callback(session: &UploadSession) -> Result<String, Error> {
    Ok(BASE64_STANDARD.encode(serde_json::to_vec(&session.callback)?))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::api::UploadCallback;

    fn session() -> UploadSession {
        UploadSession {
            task_id: "task".into(),
            upload_id: "up-1".into(),
            obj_key: "obj/key".into(),
            upload_url: "http://pds.example.com".into(),
            bucket: "bucket".into(),
            auth_info: "info".into(),
            part_size: 10,
            callback: UploadCallback {
                callback_url: "cb".into(),
                callback_body: "body".into(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_http_date() {
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();

        assert_eq!(http_date(date), "Tue, 05 Mar 2024 07:08:09 GMT");
    }

    #[test]
    fn test_object_url() {
        assert_eq!(object_url(&session()).unwrap().as_str(), "https://bucket.pds.example.com/obj/key");

        let with_port = UploadSession {
            upload_url: "http://pds.example.com:8080/".into(),
            ..session()
        };
        assert_eq!(object_url(&with_port).unwrap().as_str(), "https://bucket.pds.example.com:8080/obj/key");

        let malformed = UploadSession {
            upload_url: "pds".into(),
            ..session()
        };
        assert!(matches!(object_url(&malformed), Err(Error::InvalidUploadUrl(_))));
    }

    #[test]
    fn test_part_auth_meta() {
        let date = "Tue, 05 Mar 2024 07:08:09 GMT";

        assert_eq!(
            part_auth_meta(&session(), "video/mp4", date, "ua", 3),
            "PUT\n\nvideo/mp4\nTue, 05 Mar 2024 07:08:09 GMT\nx-oss-date:Tue, 05 Mar 2024 07:08:09 GMT\nx-oss-user-agent:ua\n\
             /bucket/obj/key?partNumber=3&uploadId=up-1"
        );
    }

    #[test]
    fn test_commit_auth_meta() {
        let date = "Tue, 05 Mar 2024 07:08:09 GMT";

        assert_eq!(
            commit_auth_meta(&session(), "md5==", "cb==", date, "ua"),
            "POST\nmd5==\napplication/xml\nTue, 05 Mar 2024 07:08:09 GMT\nx-oss-callback:cb==\n\
             x-oss-date:Tue, 05 Mar 2024 07:08:09 GMT\nx-oss-user-agent:ua\n/bucket/obj/key?uploadId=up-1"
        );
    }

    #[test]
    fn test_manifest() {
        let body = manifest(&["\"e1\"".into(), "\"e2\"".into()]);

        assert_eq!(
            body,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CompleteMultipartUpload>\n\
             <Part>\n<PartNumber>1</PartNumber>\n<ETag>\"e1\"</ETag>\n</Part>\n\
             <Part>\n<PartNumber>2</PartNumber>\n<ETag>\"e2\"</ETag>\n</Part>\n\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn test_content_md5_and_callback() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");

        let callback = callback(&session()).unwrap();
        let decoded = BASE64_STANDARD.decode(callback).unwrap();
        assert_eq!(decoded, br#"{"callbackUrl":"cb","callbackBody":"body"}"#);
    }
}
