//! 20detik video listing scraper.
//!
//! Listing: `article.list-content__item a.block-link` entries on `BASE_URL`.
//! Detail pages carry the title, body text, keywords, a duration badge and the
//! media URL (ld+json `VideoObject`, or an inline player config).

use super::types::{VideoCandidate, VideoDetails};
use super::SourceFetcher;
use crate::error::{RelayError, Result};
use crate::pages::PageConfig;
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

const LISTING_CACHE_TTL: Duration = Duration::from_secs(300);

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| RelayError::Parse(format!("bad selector {}: {:?}", css, e)))
}

fn text_of(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Article URL without query or fragment.
pub fn canonical_url(base: &Url, href: &str) -> Option<String> {
    let mut url = base.join(href.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

// ── Listing ───────────────────────────────────────────────────────────

/// Parse the listing page into candidates. Public for fixture tests.
///
/// A page without any listing articles means the markup changed, which is
/// reported as `Parse` so it is not retried.
pub fn parse_listing(html: &str, base_url: &str) -> Result<Vec<VideoCandidate>> {
    let base = Url::parse(base_url)
        .map_err(|e| RelayError::Parse(format!("invalid base url {}: {}", base_url, e)))?;
    let document = Html::parse_document(html);
    let article_sel = selector("article.list-content__item")?;
    let link_sel = selector("a.block-link")?;
    let title_sel = selector(".media__title, h2, h3")?;

    let mut articles = document.select(&article_sel).peekable();
    if articles.peek().is_none() {
        return Err(RelayError::Parse(
            "no article.list-content__item entries on listing page".into(),
        ));
    }

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for article in articles {
        let Some(link) = article.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if !href.to_lowercase().contains("video") {
            continue;
        }
        let Some(url) = canonical_url(&base, href) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        let title = article
            .select(&title_sel)
            .next()
            .map(|t| text_of(&t))
            .filter(|t| !t.is_empty())
            .or_else(|| link.value().attr("title").map(|t| t.trim().to_string()))
            .unwrap_or_else(|| text_of(&link));

        candidates.push(VideoCandidate::new(&url, &title, &url));
    }
    Ok(candidates)
}

// ── Detail page ───────────────────────────────────────────────────────

/// "45 detik" -> 45, "1:30" -> 90, "1:02:03" -> 3723.
pub fn parse_duration(text: &str) -> Option<u32> {
    let text = text.trim().to_lowercase();
    if let Some(secs) = text.strip_suffix("detik") {
        return secs.trim().parse().ok();
    }
    if text.contains(':') {
        let mut total: u32 = 0;
        for part in text.split(':') {
            let n: u32 = part.trim().parse().ok()?;
            total = total.checked_mul(60)?.checked_add(n)?;
        }
        return Some(total);
    }
    None
}

fn ld_json_video_url(html: &str) -> Option<String> {
    let re = RegexBuilder::new(r#"<script[^>]*type=["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .dot_matches_new_line(true)
        .case_insensitive(true)
        .build()
        .ok()?;
    for cap in re.captures_iter(html) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(cap[1].trim()) else {
            continue;
        };
        let objects = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        for obj in objects {
            if obj.get("@type").and_then(|t| t.as_str()) == Some("VideoObject") {
                if let Some(url) = obj.get("contentUrl").and_then(|u| u.as_str()) {
                    return Some(url.to_string());
                }
            }
        }
    }
    None
}

/// Find the playable media URL in a detail page.
pub fn extract_media_url(html: &str) -> Option<String> {
    let url = ld_json_video_url(html).or_else(|| {
        let patterns = [
            r#"videoUrl\s*:\s*["'](.*?\.m3u8[^"']*)["']"#,
            r#"<meta[^>]*content=["'](https?://[^"']*\.mp4[^"']*)["']"#,
            r#"src:\s*["'](https?://[^"']*\.mp4[^"']*)["']"#,
        ];
        patterns.iter().find_map(|p| {
            let re: Regex = RegexBuilder::new(p).case_insensitive(true).build().ok()?;
            re.captures(html).map(|c| c[1].to_string())
        })
    })?;
    if url.starts_with("//") {
        Some(format!("https:{}", url))
    } else {
        Some(url)
    }
}

/// Parse a detail page. Public for fixture tests.
pub fn parse_detail(html: &str) -> Result<VideoDetails> {
    let document = Html::parse_document(html);

    let title = document
        .select(&selector("h1.detail__title")?)
        .next()
        .or_else(|| document.select(&selector("title").ok()?).next())
        .map(|t| text_of(&t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No Title".to_string());

    let description = document
        .select(&selector("div.detail__body-text")?)
        .next()
        .map(|d| text_of(&d))
        .unwrap_or_default();

    let keywords = document
        .select(&selector(r#"meta[name="keywords"]"#)?)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| {
            c.split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let duration_s = document
        .select(&selector("div.media__icon--top-right")?)
        .next()
        .and_then(|d| parse_duration(&text_of(&d)));

    Ok(VideoDetails {
        title,
        description,
        keywords,
        duration_s,
        media_url: extract_media_url(html),
    })
}

// ── HTTP ─────────────────────────────────────────────────────────────

pub struct DetikSource {
    client: Client,
    base_url: String,
    cached: Mutex<Option<(Instant, Vec<VideoCandidate>)>>,
}

impl DetikSource {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            cached: Mutex::new(None),
        })
    }

    /// GET a page body, sorting failures into retryable and structural.
    pub async fn get_html(client: &Client, url: &str) -> Result<String> {
        let resp = client.get(url).send().await?;
        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RelayError::Fetch(format!("GET {} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(RelayError::Parse(format!("GET {} returned {}", url, status)));
        }
        Ok(resp.text().await?)
    }

    fn cached_listing(&self) -> Option<Vec<VideoCandidate>> {
        let guard = self.cached.lock().ok()?;
        match guard.as_ref() {
            Some((at, items)) if at.elapsed() < LISTING_CACHE_TTL => Some(items.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl SourceFetcher for DetikSource {
    async fn fetch(&self, page: &PageConfig) -> Result<Vec<VideoCandidate>> {
        // every page draws from the same listing, one request serves them all
        if let Some(items) = self.cached_listing() {
            tracing::debug!(page = %page.page_id, count = items.len(), "using cached listing");
            return Ok(items);
        }

        let html = Self::get_html(&self.client, &self.base_url).await?;
        let items = parse_listing(&html, &self.base_url)?;
        tracing::info!(page = %page.page_id, count = items.len(), "listing fetched");

        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some((Instant::now(), items.clone()));
        }
        Ok(items)
    }
}
