//! Channel resolver: turn a handle, URL or bare name into a channel id.
//!
//! Used by the `thanks-channels` tool to fill the channel list. Lookups go
//! through the channel's public page: the canonical link first, then the
//! `"channelId"` field in the embedded page state.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use futures_util::{stream, StreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::model::Channel;

/// Message given to channels added by the import tools.
pub const DEFAULT_MESSAGE: &str = "좋은 영상 감사합니다";

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub channel_id: String,
    pub display_name: Option<String>,
    pub subscribers: Option<String>,
}

impl ResolvedChannel {
    /// Name to store in the registry's `username` column.
    pub fn username(&self) -> String {
        match &self.display_name {
            Some(name) => name.clone(),
            None => {
                let short: String = self.channel_id.chars().take(8).collect();
                format!("channel_{}", short)
            }
        }
    }

    pub fn into_channel(self, message: &str) -> Channel {
        Channel {
            display_name: self.username(),
            channel_id: self.channel_id,
            message: message.to_string(),
        }
    }
}

/// Expand user input into a fetchable channel URL.
///
/// `@name` → `https://www.youtube.com/@name`, `youtube.com/...` gets a scheme,
/// full URLs pass through, anything else is treated as a bare handle.
pub fn normalize_input(input: &str) -> String {
    let input = input.trim();
    if input.starts_with('@') {
        format!("https://www.youtube.com/{}", input)
    } else if input.starts_with("http") {
        input.to_string()
    } else if input.starts_with("youtube.com") || input.starts_with("www.youtube.com") {
        format!("https://{}", input)
    } else {
        format!("https://www.youtube.com/@{}", input)
    }
}

/// Channel id from a `/channel/<id>` URL, read from the URL itself.
pub fn channel_id_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/channel/")?;
    let id: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    (id.starts_with("UC") && id.len() == 24).then_some(id)
}

/// Find the channel id in a channel page: canonical link, else page state.
pub fn extract_channel_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    if let Ok(sel) = Selector::parse(r#"link[rel="canonical"]"#) {
        for link in document.select(&sel) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if let Some((_, id)) = href.rsplit_once("channel/") {
                let id = id.trim_end_matches('/');
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
    }
    let re = Regex::new(r#""channelId":"(UC[0-9A-Za-z_-]{22})""#).ok()?;
    re.captures(html).map(|c| c[1].to_string())
}

pub fn extract_display_name(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse(r#"meta[property="og:title"]"#).ok()?;
    document
        .select(&sel)
        .filter_map(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

fn extract_subscribers(html: &str) -> Option<String> {
    let re = Regex::new(r#""subscriberCountText":\{"simpleText":"([^"]+)""#).ok()?;
    re.captures(html).map(|c| c[1].to_string())
}

pub struct ChannelResolver {
    client: reqwest::Client,
}

impl ChannelResolver {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(RESOLVE_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// `Ok(None)` when the page loaded but carried no channel id.
    pub async fn resolve(&self, input: &str) -> anyhow::Result<Option<ResolvedChannel>> {
        let url = normalize_input(input);
        if let Some(channel_id) = channel_id_from_url(&url) {
            // The id is already known; the page is only needed for its name.
            let html = match self.fetch_page(&url).await {
                Ok(html) => Some(html),
                Err(e) => {
                    debug!("[resolve] {}: no channel details: {:#}", channel_id, e);
                    None
                }
            };
            return Ok(Some(ResolvedChannel {
                channel_id,
                display_name: html.as_deref().and_then(extract_display_name),
                subscribers: html.as_deref().and_then(extract_subscribers),
            }));
        }

        let html = self.fetch_page(&url).await?;
        Ok(extract_channel_id(&html).map(|channel_id| ResolvedChannel {
            channel_id,
            display_name: extract_display_name(&html),
            subscribers: extract_subscribers(&html),
        }))
    }

    async fn fetch_page(&self, url: &str) -> anyhow::Result<String> {
        debug!("[resolve] fetching {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("{} answered HTTP {}", url, status);
        }
        resp.text().await.with_context(|| format!("reading {}", url))
    }

    /// Resolve many inputs with at most `workers` lookups in flight.
    /// Results come back in input order.
    pub async fn resolve_all(&self, inputs: Vec<String>, workers: usize) -> Vec<ImportOutcome> {
        let total = inputs.len();
        stream::iter(inputs.into_iter().enumerate().map(|(i, input)| async move {
            let result = match self.resolve(&input).await {
                Ok(Some(ch)) => {
                    info!("[resolve] {:>3}/{} {} -> {}", i + 1, total, input, ch.channel_id);
                    Ok(ch)
                }
                Ok(None) => {
                    warn!("[resolve] {:>3}/{} {}: no channel id on page", i + 1, total, input);
                    Err("channel id not found".to_string())
                }
                Err(e) => {
                    warn!("[resolve] {:>3}/{} {}: {:#}", i + 1, total, input, e);
                    Err(format!("{:#}", e))
                }
            };
            ImportOutcome { input, result }
        }))
        .buffered(workers.max(1))
        .collect()
        .await
    }
}

/// Lines of an import file, minus blanks and `#` comments.
pub fn read_inputs(path: &Path) -> anyhow::Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_inputs(&content))
}

fn parse_inputs(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub input: String,
    pub result: Result<ResolvedChannel, String>,
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub succeeded: usize,
    /// `(input, reason)`
    pub failed: Vec<(String, String)>,
    /// `(input, channel_id)` for channels already registered or repeated in the batch.
    pub duplicates: Vec<(String, String)>,
    pub new: Vec<ResolvedChannel>,
}

impl ImportSummary {
    pub fn from_outcomes(outcomes: Vec<ImportOutcome>, known: &HashSet<String>) -> Self {
        let mut summary = Self::default();
        let mut seen: HashSet<String> = HashSet::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(ch) => {
                    summary.succeeded += 1;
                    if known.contains(&ch.channel_id) || !seen.insert(ch.channel_id.clone()) {
                        summary.duplicates.push((outcome.input, ch.channel_id));
                    } else {
                        summary.new.push(ch);
                    }
                }
                Err(reason) => summary.failed.push((outcome.input, reason)),
            }
        }
        summary
    }
}
