//! Detail-page lookup plus a `yt-dlp` download into the staging directory.

use super::hash::sha256_file;
use super::staging::StagingDir;
use super::{MediaAcquirer, MediaHandle};
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::feed::detik::{parse_detail, DetikSource};
use crate::feed::types::VideoCandidate;
use async_trait::async_trait;
use reqwest::Client;
use std::process::Stdio;

pub struct YtDlpAcquirer {
    client: Client,
    staging: StagingDir,
    ytdlp_path: String,
    format: String,
}

impl YtDlpAcquirer {
    pub fn new(config: &Config, staging: StagingDir) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.source.user_agent.as_str())
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            staging,
            ytdlp_path: config.media.ytdlp_path.clone(),
            format: config.media.format.clone(),
        })
    }

    async fn download(&self, media_url: &str, stem: &str) -> Result<std::path::PathBuf> {
        let template = self.staging.root().join(format!("{}.%(ext)s", stem));
        let output = tokio::process::Command::new(&self.ytdlp_path)
            .arg("--format")
            .arg(&self.format)
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--output")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg(media_url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RelayError::unavailable(format!("{} not installed", self.ytdlp_path))
                } else {
                    RelayError::acquire(format!("failed to start {}: {}", self.ytdlp_path, e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(RelayError::acquire(format!(
                "yt-dlp exited with {}: {}",
                output.status, tail
            )));
        }

        self.staging
            .find(stem)
            .map_err(|e| RelayError::acquire(format!("cannot scan staging dir: {}", e)))?
            .ok_or_else(|| RelayError::acquire("yt-dlp reported success but produced no file"))
    }
}

#[async_trait]
impl MediaAcquirer for YtDlpAcquirer {
    async fn acquire(&self, candidate: &VideoCandidate) -> Result<MediaHandle> {
        let html = DetikSource::get_html(&self.client, &candidate.source_url)
            .await
            .map_err(|e| match e {
                RelayError::Fetch(m) => RelayError::acquire(m),
                other => RelayError::unavailable(other.to_string()),
            })?;
        let details = parse_detail(&html).map_err(|e| RelayError::unavailable(e.to_string()))?;
        let media_url = details
            .media_url
            .clone()
            .ok_or_else(|| RelayError::unavailable("no media URL on detail page"))?;

        let stem = self.staging.stem_for(&candidate.video_id);
        tracing::info!(video_id = %candidate.video_id, media_url = %media_url, "downloading");
        let path = self.download(&media_url, &stem).await?;

        let hash_path = path.clone();
        let content_hash = tokio::task::spawn_blocking(move || sha256_file(&hash_path))
            .await
            .map_err(|e| RelayError::acquire(format!("hash task failed: {}", e)))?
            .map_err(|e| RelayError::acquire(format!("cannot hash {}: {}", path.display(), e)))?;
        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|e| RelayError::acquire(format!("cannot stat {}: {}", path.display(), e)))?;

        tracing::info!(
            video_id = %candidate.video_id,
            size_bytes,
            duration_s = ?details.duration_s,
            "media acquired"
        );
        Ok(MediaHandle {
            path,
            content_hash,
            size_bytes,
            details,
        })
    }
}
