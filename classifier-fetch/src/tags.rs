//! HTTP clients for the two tag-related upstream documents: the tag
//! index feed (list of tag training URLs) and individual tag training
//! documents, both fetched with conditional-GET semantics.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use tracing::debug;

use classifier_core::FetchError;

/// Result of a conditional GET: either the body changed, or the
/// upstream told us (304, or an identical Last-Modified) that it did
/// not.
#[derive(Debug, Clone)]
pub enum ConditionalFetch {
    Fetched { body: String, updated: Option<DateTime<Utc>> },
    NotModified,
    NotFound,
}

fn parse_last_modified(response: &reqwest::Response) -> Option<DateTime<Utc>> {
    response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

async fn conditional_get(
    http: &Client,
    url: &str,
    since: Option<DateTime<Utc>>,
) -> Result<ConditionalFetch, FetchError> {
    let mut request = http.get(url);
    if let Some(since) = since {
        request = request.header(
            reqwest::header::IF_MODIFIED_SINCE,
            since.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    }

    let response = request.send().await.map_err(|e| FetchError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match response.status() {
        StatusCode::NOT_MODIFIED => Ok(ConditionalFetch::NotModified),
        StatusCode::NOT_FOUND => Ok(ConditionalFetch::NotFound),
        status if status.is_success() => {
            let updated = parse_last_modified(&response);
            let body = response.text().await.map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            Ok(ConditionalFetch::Fetched { body, updated })
        }
        status => Err(FetchError::BadStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }),
    }
}

/// Fetches a single tag's training document.
pub struct TagDocumentClient {
    http: Client,
}

impl TagDocumentClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Fetch `tag_url` unconditionally (used the first time a tag is
    /// seen — there is no resident copy to compare against).
    pub async fn fetch(&self, tag_url: &str) -> Result<ConditionalFetch, FetchError> {
        debug!(tag_url, "fetching tag training document");
        conditional_get(&self.http, tag_url, None).await
    }

    /// Fetch `tag_url`, telling upstream we already have a copy
    /// updated at `since`.
    pub async fn fetch_if_modified_since(
        &self,
        tag_url: &str,
        since: DateTime<Utc>,
    ) -> Result<ConditionalFetch, FetchError> {
        debug!(tag_url, %since, "refreshing tag training document");
        conditional_get(&self.http, tag_url, Some(since)).await
    }
}

/// Fetches the tag index feed listing every tag's training URL.
pub struct TagIndexClient {
    http: Client,
    index_url: String,
}

impl TagIndexClient {
    pub fn new(http: Client, index_url: impl Into<String>) -> Self {
        Self {
            http,
            index_url: index_url.into(),
        }
    }

    pub async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<ConditionalFetch, FetchError> {
        conditional_get(&self.http, &self.index_url, since).await
    }
}
