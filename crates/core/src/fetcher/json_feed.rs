//! Fetcher for sources that publish novels as JSON feeds.
//!
//! The index document at the proposal link looks like:
//!
//! ```json
//! { "title": "...", "slug": "...", "author": "...", "description": "...",
//!   "chapters": [{ "url": "...", "title": "...", "number": 1 }] }
//! ```
//!
//! and every chapter URL answers with `{ "title": "...", "content": "..." }`.
//! Relative chapter URLs are resolved against the index link.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use crate::config::FetcherConfig;

use super::{
    is_cloudflare_message, slugify, ChapterRef, ContentFetcher, FetchError, FetchedChapter,
    NovelIndex,
};

/// Largest error body kept in error messages.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Deserialize)]
struct FeedIndex {
    title: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    chapters: Vec<FeedChapterRef>,
}

#[derive(Debug, Deserialize)]
struct FeedChapterRef {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FeedChapter {
    #[serde(default)]
    title: Option<String>,
    content: String,
}

/// JSON feed fetcher backed by `reqwest`.
pub struct JsonFeedFetcher {
    client: Client,
    hosts: Vec<String>,
}

impl JsonFeedFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let mut builder =
            Client::builder().timeout(Duration::from_secs(config.request_timeout_secs));
        if let Some(ref user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self {
            client,
            hosts: config.hosts.iter().map(|h| h.to_lowercase()).collect(),
        })
    }

    fn host_matches(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
    }

    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<Response, FetchError> {
        let mut request = self.client.get(url).header(ACCEPT, "application/json");
        if let Some(cookie) = cookie.map(str::trim).filter(|c| !c.is_empty()) {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let challenged = response
            .headers()
            .get("cf-mitigated")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("challenge"))
            .unwrap_or(false);
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(
            body.char_indices()
                .nth(ERROR_BODY_LIMIT)
                .map(|(i, _)| i)
                .unwrap_or(body.len()),
        );

        if is_challenge_status(status) && (challenged || is_challenge_body(&body)) {
            return Err(FetchError::Blocked(format!("{} answered {}", url, status)));
        }
        Err(FetchError::Http {
            status: status.as_u16(),
            message: body,
        })
    }
}

fn is_challenge_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS
    )
}

fn is_challenge_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    is_cloudflare_message(&lower)
        || lower.contains("just a moment")
        || lower.contains("challenge-platform")
}

#[async_trait]
impl ContentFetcher for JsonFeedFetcher {
    fn name(&self) -> &str {
        "json_feed"
    }

    fn can_import(&self, link: &str) -> bool {
        Url::parse(link.trim())
            .ok()
            .and_then(|url| url.host_str().map(|h| self.host_matches(h)))
            .unwrap_or(false)
    }

    async fn fetch_index(
        &self,
        link: &str,
        cookie: Option<&str>,
    ) -> Result<NovelIndex, FetchError> {
        let base = Url::parse(link.trim()).map_err(|e| FetchError::Unsupported(e.to_string()))?;
        debug!(link, "Fetching novel index");

        let feed: FeedIndex = self
            .get(base.as_str(), cookie)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("index: {}", e)))?;

        let mut chapters = Vec::with_capacity(feed.chapters.len());
        for (i, chapter) in feed.chapters.into_iter().enumerate() {
            let url = base
                .join(&chapter.url)
                .map_err(|e| FetchError::Parse(format!("chapter url {}: {}", chapter.url, e)))?;
            let number = chapter.number.unwrap_or(i as i64 + 1);
            let title = if chapter.title.trim().is_empty() {
                format!("Chapter {}", number)
            } else {
                chapter.title
            };
            chapters.push(ChapterRef {
                number,
                title,
                url: url.to_string(),
            });
        }

        let slug = feed
            .slug
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| slugify(&feed.title));

        Ok(NovelIndex {
            title: feed.title,
            slug,
            author: feed.author,
            description: feed.description,
            chapters,
        })
    }

    async fn fetch_chapter(
        &self,
        chapter: &ChapterRef,
        cookie: Option<&str>,
    ) -> Result<FetchedChapter, FetchError> {
        debug!(number = chapter.number, url = %chapter.url, "Fetching chapter");

        let feed: FeedChapter = self
            .get(&chapter.url, cookie)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("chapter {}: {}", chapter.number, e)))?;

        Ok(FetchedChapter {
            number: chapter.number,
            title: feed
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| chapter.title.clone()),
            content: feed.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(hosts: &[&str]) -> JsonFeedFetcher {
        JsonFeedFetcher::new(&FetcherConfig {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_can_import_matches_host_and_subdomains() {
        let fetcher = fetcher(&["books.example.com"]);
        assert!(fetcher.can_import("https://books.example.com/novel/1"));
        assert!(fetcher.can_import("https://m.books.example.com/novel/1"));
        assert!(fetcher.can_import("  https://BOOKS.example.com/novel/1 "));
        assert!(!fetcher.can_import("https://evilbooks.example.com/novel/1"));
        assert!(!fetcher.can_import("not a url"));
    }

    #[test]
    fn test_no_hosts_imports_nothing() {
        let fetcher = fetcher(&[]);
        assert!(!fetcher.can_import("https://books.example.com/novel/1"));
    }

    #[test]
    fn test_challenge_detection() {
        assert!(is_challenge_status(StatusCode::FORBIDDEN));
        assert!(!is_challenge_status(StatusCode::NOT_FOUND));
        assert!(is_challenge_body("<title>Just a moment...</title>"));
        assert!(is_challenge_body("cdn-cgi/challenge-platform/h/b"));
        assert!(!is_challenge_body("{\"error\":\"forbidden\"}"));
    }

    #[test]
    fn test_feed_index_deserializes_with_defaults() {
        let feed: FeedIndex = serde_json::from_str(
            r#"{"title": "Sword Saint", "chapters": [{"url": "/c/1"}]}"#,
        )
        .unwrap();
        assert!(feed.slug.is_none());
        assert_eq!(feed.chapters.len(), 1);
        assert!(feed.chapters[0].number.is_none());
    }
}
