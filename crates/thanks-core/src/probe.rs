//! Feed prober: fetch a channel's video listing and pull out the newest
//! upload id.
//!
//! The listing page embeds its initial state as `var ytInitialData = {…}` in
//! a `<script>`. We take the **first** `"videoId":"…"` in that blob. The
//! platform currently lists the newest upload first there; nothing guarantees
//! it, so `verify_with_feed` can cross-check against the Atom feed.

use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::model::LatestVideo;

const INITIAL_DATA_MARKER: &str = "var ytInitialData";

/// How far past the id we look for its title, in bytes.
const TITLE_WINDOW: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
}

impl ProbeError {
    /// Network-level faults that widen the next timeout. A status error means
    /// the server answered, so it does not count.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Status(_))
    }

    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else if e.is_connect() {
            Self::Connect(e)
        } else {
            Self::Request(e)
        }
    }
}

pub struct FeedProber {
    client: reqwest::Client,
    url_template: String,
    feed_url_template: Option<String>,
}

impl FeedProber {
    pub fn new(config: &ProbeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            url_template: config.url_template.clone(),
            feed_url_template: config
                .verify_with_feed
                .then(|| config.feed_url_template.clone()),
        })
    }

    pub fn listing_url(&self, channel_id: &str) -> String {
        self.url_template.replace("{channel_id}", channel_id)
    }

    /// One fetch-and-extract attempt. `Ok(None)` means the page loaded but no
    /// video id could be found.
    pub async fn probe(
        &self,
        channel_id: &str,
        timeout: Duration,
    ) -> Result<Option<LatestVideo>, ProbeError> {
        let url = self.listing_url(channel_id);
        let response = self
            .client
            .get(&url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, timeout))?;

        let latest = extract_latest_video(&html);
        match &latest {
            Some(video) => {
                debug!("[probe] {} latest={}", channel_id, video.video_id);
                if let Some(template) = &self.feed_url_template {
                    self.cross_check(template, channel_id, &video.video_id, timeout)
                        .await;
                }
            }
            None => debug!("[probe] {} no video id in page", channel_id),
        }
        Ok(latest)
    }

    /// Compare the blob's pick with the feed's newest entry. Disagreement is
    /// only logged; the feed lags behind the page by minutes.
    async fn cross_check(
        &self,
        template: &str,
        channel_id: &str,
        video_id: &str,
        timeout: Duration,
    ) {
        let url = template.replace("{channel_id}", channel_id);
        let body = match self.client.get(&url).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    debug!("[probe] {} feed read failed: {}", channel_id, e);
                    return;
                }
            },
            Ok(resp) => {
                debug!("[probe] {} feed HTTP {}", channel_id, resp.status());
                return;
            }
            Err(e) => {
                debug!("[probe] {} feed fetch failed: {}", channel_id, e);
                return;
            }
        };

        match newest_feed_video(&body) {
            Some(feed_id) if feed_id != video_id => warn!(
                "[probe] {} page blob says {} but feed's newest is {}",
                channel_id, video_id, feed_id
            ),
            Some(_) => {}
            None => debug!("[probe] {} feed had no entries", channel_id),
        }
    }
}

/// First video id (and its title, if nearby) inside the `ytInitialData` script.
pub fn extract_latest_video(html: &str) -> Option<LatestVideo> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script").ok()?;
    let blob = document
        .select(&selector)
        .map(|script| script.text().collect::<String>())
        .find(|text| text.contains(INITIAL_DATA_MARKER))?;

    let id_re = Regex::new(r#""videoId":"([^"]+)""#).ok()?;
    let caps = id_re.captures(&blob)?;
    let id_match = caps.get(1)?;

    Some(LatestVideo {
        video_id: id_match.as_str().to_string(),
        title: title_after(&blob, id_match.end()),
    })
}

fn title_after(blob: &str, from: usize) -> Option<String> {
    let title_re = Regex::new(r#""title":\{"runs":\[\{"text":"((?:[^"\\]|\\.)*)""#).ok()?;
    let caps = title_re.captures_at(blob, from)?;
    let raw = caps.get(1)?;
    if raw.start() - from > TITLE_WINDOW {
        return None;
    }
    // The blob is JSON, so the captured text is a JSON string body.
    serde_json::from_str::<String>(&format!("\"{}\"", raw.as_str()))
        .ok()
        .filter(|t| !t.trim().is_empty())
}

/// Newest entry's video id from a channel Atom feed (`yt:video:<id>`).
pub fn newest_feed_video(body: &[u8]) -> Option<String> {
    let feed = feed_rs::parser::parse(body).ok()?;
    let entry = feed.entries.first()?;
    Some(
        entry
            .id
            .strip_prefix("yt:video:")
            .unwrap_or(&entry.id)
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(blob: &str) -> String {
        format!(
            "<html><head><script>window.other = {{\"videoId\":\"decoy\"}};</script></head>\
             <body><script nonce=\"x\">var ytInitialData = {};</script></body></html>",
            blob
        )
    }

    #[test]
    fn test_first_match_wins() {
        let html = page(
            r#"{"contents":[{"videoRenderer":{"videoId":"newest11111","title":{"runs":[{"text":"Fresh \"upload\""}]}}},{"videoRenderer":{"videoId":"older222222"}}]}"#,
        );
        let video = extract_latest_video(&html).unwrap();
        assert_eq!(video.video_id, "newest11111");
        assert_eq!(video.title.as_deref(), Some("Fresh \"upload\""));
    }

    #[test]
    fn test_marker_script_is_required() {
        let html = "<html><script>var somethingElse = {\"videoId\":\"abc\"};</script></html>";
        assert_eq!(extract_latest_video(html), None);
    }

    #[test]
    fn test_no_video_id_is_none() {
        let html = page(r#"{"contents":[]}"#);
        assert_eq!(extract_latest_video(&html), None);
    }

    #[test]
    fn test_title_is_optional() {
        let html = page(r#"{"videoId":"lonely00000"}"#);
        let video = extract_latest_video(&html).unwrap();
        assert_eq!(video.video_id, "lonely00000");
        assert!(video.title.is_none());
    }

    #[test]
    fn test_newest_feed_video() {
        let feed = br#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
 <id>yt:channel:UCaaaaaaaaaaaaaaaaaaaaaa</id>
 <title>Channel</title>
 <updated>2025-06-01T00:00:00+00:00</updated>
 <entry>
  <id>yt:video:newest11111</id>
  <yt:videoId>newest11111</yt:videoId>
  <title>Newest</title>
  <updated>2025-06-01T00:00:00+00:00</updated>
 </entry>
 <entry>
  <id>yt:video:older222222</id>
  <yt:videoId>older222222</yt:videoId>
  <title>Older</title>
  <updated>2025-05-01T00:00:00+00:00</updated>
 </entry>
</feed>"#;
        assert_eq!(newest_feed_video(feed).as_deref(), Some("newest11111"));
        assert_eq!(newest_feed_video(b"not xml"), None);
    }

    #[test]
    fn test_status_errors_are_not_transient() {
        assert!(!ProbeError::Status(reqwest::StatusCode::NOT_FOUND).is_transient());
        assert!(ProbeError::Timeout(Duration::from_secs(10)).is_transient());
    }
}
