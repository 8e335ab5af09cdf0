use super::types::*;
use crate::config::PublishConfig;
use crate::error::{RelayError, Result};
use crate::pages::PageConfig;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Graph error codes that mean "slow down".
const THROTTLE_CODES: [i64; 4] = [4, 17, 32, 613];
/// Invalid or expired access token.
const AUTH_CODE: i64 = 190;
const BUDGET_WINDOW: Duration = Duration::from_secs(3600);

/// Map a failed Graph response onto the relay error taxonomy.
pub fn classify_error(status: u16, body: &str, page: &PageConfig) -> RelayError {
    let graph = serde_json::from_str::<GraphErrorEnvelope>(body).ok().map(|e| e.error);
    let code = graph.as_ref().and_then(|g| g.code);
    let message = graph
        .as_ref()
        .map(|g| {
            let kind = g.kind.as_deref().unwrap_or("GraphError");
            match g.error_subcode {
                Some(sub) => format!("{} ({}) code {:?}/{}: {}", kind, status, code, sub, g.message),
                None => format!("{} ({}) code {:?}: {}", kind, status, code, g.message),
            }
        })
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body.chars().take(300).collect::<String>()));

    if status == 401 || status == 403 || code == Some(AUTH_CODE) {
        return RelayError::Auth {
            page: page.page_id.clone(),
            message,
        };
    }
    if status == 429 || code.is_some_and(|c| THROTTLE_CODES.contains(&c)) {
        return RelayError::RateLimit(message);
    }
    RelayError::Publish(message)
}

/// Transport failures never carry the URL, which may hold a token.
fn transport(err: reqwest::Error) -> RelayError {
    RelayError::Publish(err.without_url().to_string())
}

struct CallWindow {
    started: Instant,
    calls: u32,
}

pub struct GraphClient {
    client: Client,
    graph_base: String,
    video_base: String,
    rupload_base: String,
    api_version: String,
    hourly_budget: u32,
    upload_timeout: Duration,
    windows: Mutex<HashMap<String, CallWindow>>,
}

impl GraphClient {
    /// `timeout` bounds the small JSON calls; media uploads get
    /// `config.upload_timeout_s` instead.
    pub fn new(config: &PublishConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            graph_base: config.graph_base.trim_end_matches('/').to_string(),
            video_base: config.graph_video_base.trim_end_matches('/').to_string(),
            rupload_base: config.rupload_base.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            hourly_budget: config.hourly_call_budget,
            upload_timeout: Duration::from_secs(config.upload_timeout_s),
            windows: Mutex::new(HashMap::new()),
        })
    }

    /// Count one call against the page's hourly budget.
    fn charge(&self, page: &PageConfig) -> Result<()> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RelayError::Publish("call budget lock poisoned".into()))?;
        let window = windows
            .entry(page.page_id.clone())
            .or_insert_with(|| CallWindow {
                started: Instant::now(),
                calls: 0,
            });
        if window.started.elapsed() > BUDGET_WINDOW {
            window.started = Instant::now();
            window.calls = 0;
        }
        if window.calls >= self.hourly_budget {
            return Err(RelayError::RateLimit(format!(
                "hourly Graph call budget ({}) used up for page {}",
                self.hourly_budget, page.page_id
            )));
        }
        window.calls += 1;
        Ok(())
    }

    async fn parse<T: serde::de::DeserializeOwned>(resp: Response, page: &PageConfig, what: &str) -> Result<T> {
        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body, page));
        }
        serde_json::from_str(&body)
            .map_err(|e| RelayError::Publish(format!("failed to parse {} response: {}", what, e)))
    }

    /// Pre-flight check that the page token still works.
    pub async fn verify_token(&self, page: &PageConfig) -> Result<()> {
        self.charge(page)?;
        let url = format!("{}/{}/{}", self.graph_base, self.api_version, page.page_id);
        let resp = self
            .client
            .get(&url)
            .query(&[("fields", "id,name"), ("access_token", page.access_token())])
            .send()
            .await
            .map_err(transport)?;
        let info: PageInfo = Self::parse(resp, page, "page info").await?;
        tracing::debug!(page = %page.page_id, name = ?info.name, "token accepted");
        Ok(())
    }

    /// Single-request upload to the page's video feed. Returns the video id.
    pub async fn upload_video(&self, page: &PageConfig, path: &Path, description: &str) -> Result<String> {
        self.charge(page)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RelayError::Publish(format!("cannot read {}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video.mp4".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")
            .map_err(transport)?;
        let form = Form::new()
            .text("access_token", page.access_token().to_string())
            .text("description", description.to_string())
            .text("published", "true")
            .part("source", part);

        let url = format!("{}/{}/{}/videos", self.video_base, self.api_version, page.page_id);
        let resp = self
            .client
            .post(&url)
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let parsed: VideoUploadResponse = Self::parse(resp, page, "video upload").await?;
        Ok(parsed.id)
    }

    /// Three-phase Reel upload: start, binary transfer, finish. Returns the video id.
    pub async fn upload_reel(&self, page: &PageConfig, path: &Path, description: &str) -> Result<String> {
        let reels_url = format!("{}/{}/{}/video_reels", self.graph_base, self.api_version, page.page_id);

        self.charge(page)?;
        let resp = self
            .client
            .post(&reels_url)
            .form(&[("upload_phase", "start"), ("access_token", page.access_token())])
            .send()
            .await
            .map_err(transport)?;
        let start: ReelStartResponse = Self::parse(resp, page, "reel start").await?;
        let video_id = start.video_id;

        self.charge(page)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RelayError::Publish(format!("cannot read {}: {}", path.display(), e)))?;
        let upload_url = format!("{}/video-upload/{}/{}", self.rupload_base, self.api_version, video_id);
        let resp = self
            .client
            .post(&upload_url)
            .timeout(self.upload_timeout)
            .header("Authorization", format!("OAuth {}", page.access_token()))
            .header("offset", "0")
            .header("file_size", bytes.len().to_string())
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(transport)?;
        let uploaded: SuccessResponse = Self::parse(resp, page, "reel upload").await?;
        if !uploaded.success {
            return Err(RelayError::Publish(format!("reel binary upload for {} not acknowledged", video_id)));
        }

        self.charge(page)?;
        let resp = self
            .client
            .post(&reels_url)
            .form(&[
                ("access_token", page.access_token()),
                ("video_id", video_id.as_str()),
                ("upload_phase", "finish"),
                ("description", description),
                ("video_state", "PUBLISHED"),
                ("container_type", "REELS"),
                ("share_to_feed", "true"),
                ("allow_share_to_stories", "true"),
            ])
            .send()
            .await
            .map_err(transport)?;
        let finished: SuccessResponse = Self::parse(resp, page, "reel finish").await?;
        if !finished.success {
            return Err(RelayError::Publish(format!("reel {} finish not acknowledged", video_id)));
        }
        Ok(video_id)
    }

    pub async fn video_status(&self, page: &PageConfig, video_id: &str) -> Result<VideoStatusResponse> {
        self.charge(page)?;
        let url = format!("{}/{}/{}", self.graph_base, self.api_version, video_id);
        let resp = self
            .client
            .get(&url)
            .query(&[("fields", "status,permalink_url"), ("access_token", page.access_token())])
            .send()
            .await
            .map_err(transport)?;
        Self::parse(resp, page, "video status").await
    }

    /// Poll until the video is `ready`. Returns the permalink when known.
    ///
    /// Only an explicit processing failure is an error. The post already
    /// exists once `finish` succeeded, so a slow or unreachable status
    /// endpoint ends the wait with `Ok(None)`.
    pub async fn wait_until_ready(
        &self,
        page: &PageConfig,
        video_id: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Option<String>> {
        let started = Instant::now();
        loop {
            match self.video_status(page, video_id).await {
                Ok(status) => match status.state() {
                    Some("ready") => return Ok(status.permalink_url),
                    Some("error") => {
                        return Err(RelayError::Publish(format!("video {} failed processing", video_id)))
                    }
                    state => {
                        tracing::debug!(page = %page.page_id, video_id, state = ?state, "still processing");
                    }
                },
                Err(e) => {
                    tracing::warn!(page = %page.page_id, video_id, error = %e, "status check failed");
                }
            }
            if started.elapsed() + poll > timeout {
                tracing::warn!(page = %page.page_id, video_id, "not ready after {}s, assuming published", timeout.as_secs());
                return Ok(None);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
