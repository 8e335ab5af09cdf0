//! Post descriptions: a short summary, hashtags and the source link.
//!
//! With an OpenAI key the summary comes from the chat-completions API; without
//! one, or when that call fails, the description is truncated and a random
//! call-to-action is appended. Captioning never fails a unit of work.

use crate::config::CaptionConfig;
use crate::error::RelayError;
use crate::feed::types::{VideoCandidate, VideoDetails};
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const CTAS: [&str; 4] = [
    "Komen pendapatmu di bawah, ya!",
    "Tag temen yang harus tahu!",
    "Share ke grupmu, bro!",
    "Apa sih menurutmu? Tulis di kolom komen!",
];

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct Captioner {
    client: Client,
    api_key: Option<String>,
    config: CaptionConfig,
}

impl Captioner {
    pub fn new(config: CaptionConfig, api_key: Option<String>) -> crate::error::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build captioning client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// Captioner that never calls out.
    pub fn offline(config: CaptionConfig) -> crate::error::Result<Self> {
        Self::new(config, None)
    }

    pub fn uses_ai(&self) -> bool {
        self.api_key.is_some()
    }

    /// Full post description for a candidate.
    pub async fn describe(&self, candidate: &VideoCandidate, details: &VideoDetails) -> String {
        let hashtags = details.hashtags();
        let body = if details.description.is_empty() {
            details.title.as_str()
        } else {
            details.description.as_str()
        };

        let summary = match &self.api_key {
            Some(key) => match self.summarize(key, body, &hashtags).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(video_id = %candidate.video_id, error = %e, "AI caption failed, using fallback");
                    fallback_summary(body, self.config.max_length)
                }
            },
            None => fallback_summary(body, self.config.max_length),
        };
        compose(&summary, &hashtags, &candidate.source_url)
    }

    async fn summarize(&self, api_key: &str, text: &str, hashtags: &str) -> Result<String> {
        let prompt = format!(
            "Ringkas berita ini maksimal {} kata dengan gaya santai seperti ngobrol dengan teman. \
             Sisipkan kata kunci '{}' secara alami, pakai 1-2 emoji yang relevan, \
             tutup dengan salah satu ajakan berikut: {}. Cukup 2-3 kalimat dalam satu paragraf. \
             Berita: {}",
            self.config.max_length,
            hashtags,
            CTAS.join(" / "),
            text
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": "Kamu menulis ringkasan berita singkat yang santai dan ramah SEO."},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": 200,
            "temperature": 0.7
        });
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("caption request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("caption API ({}): {}", status, body.chars().take(200).collect::<String>());
        }
        let parsed: ChatResponse = resp.json().await.context("failed to parse caption response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .context("caption response had no content")?;
        Ok(content)
    }
}

/// First `max_chars` characters plus a random call-to-action.
pub fn fallback_summary(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let mut summary: String = trimmed.chars().take(max_chars).collect();
    if trimmed.chars().count() > max_chars {
        summary = summary.trim_end().to_string();
        summary.push_str("...");
    }
    let cta = CTAS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(CTAS[0]);
    if summary.is_empty() {
        cta.to_string()
    } else {
        format!("{}\n\n{}", summary, cta)
    }
}

pub fn compose(summary: &str, hashtags: &str, source_url: &str) -> String {
    let mut out = summary.trim().to_string();
    if !hashtags.is_empty() {
        out.push_str("\n\n");
        out.push_str(hashtags);
    }
    out.push_str("\n\nSumber: ");
    out.push_str(source_url);
    out
}
