//! Signed upload of a batch of taggings to a tag's result endpoint.

use md5::{Digest, Md5};
use reqwest::Client;

use classifier_core::FetchError;

use crate::signing::{rfc1123_now, sign, Credentials, SignableRequest};

/// Whether this is the first upload for a tagger this session (PUT,
/// replacing all prior classifier-generated taggings) or a later one
/// (POST, appending).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Replace,
    Append,
}

pub struct ResultUploader {
    http: Client,
    credentials: Credentials,
}

impl ResultUploader {
    pub fn new(http: Client, credentials: Credentials) -> Self {
        Self { http, credentials }
    }

    /// `url` is the tagger's result-upload endpoint; `body` is the
    /// atom feed of scored taggings.
    pub async fn upload(&self, url: &str, body: String, mode: UploadMode) -> Result<(), FetchError> {
        let path = reqwest::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        let content_type = "application/atom+xml";
        let content_md5 = format!("{:x}", Md5::digest(body.as_bytes()));
        let date = rfc1123_now();

        let method_str = match mode {
            UploadMode::Replace => "PUT",
            UploadMode::Append => "POST",
        };

        let signable = SignableRequest {
            method: method_str,
            path: &path,
            content_type,
            content_md5: &content_md5,
            date: &date,
        };
        let authorization = sign(&signable, &self.credentials)?;

        let request = match mode {
            UploadMode::Replace => self.http.put(url),
            UploadMode::Append => self.http.post(url),
        };

        let response = request
            .header("Content-Type", content_type)
            .header("Content-MD5", &content_md5)
            .header("Date", &date)
            .header("Authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_md5_is_deterministic() {
        let a = format!("{:x}", Md5::digest(b"hello"));
        let b = format!("{:x}", Md5::digest(b"hello"));
        assert_eq!(a, b);
    }
}
