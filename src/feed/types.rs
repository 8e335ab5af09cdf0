use chrono::{DateTime, Utc};

/// A video found on the source listing, not yet known to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoCandidate {
    /// Canonical article URL; unique per source video.
    pub video_id: String,
    pub title: String,
    pub source_url: String,
    pub discovered_at: DateTime<Utc>,
}

impl VideoCandidate {
    pub fn new(video_id: &str, title: &str, source_url: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            title: title.to_string(),
            source_url: source_url.to_string(),
            discovered_at: Utc::now(),
        }
    }
}

/// Everything the article page says about its video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoDetails {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub duration_s: Option<u32>,
    pub media_url: Option<String>,
}

impl VideoDetails {
    /// `#keyword` tags with inner spaces removed, in page order.
    pub fn hashtags(&self) -> String {
        self.keywords
            .iter()
            .map(|k| k.replace(' ', ""))
            .filter(|k| !k.is_empty())
            .map(|k| format!("#{}", k))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
