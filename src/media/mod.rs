pub mod downloader;
pub mod hash;
pub mod staging;

use crate::error::Result;
use crate::feed::types::{VideoCandidate, VideoDetails};
use async_trait::async_trait;
use std::path::PathBuf;

/// A downloaded clip sitting in the staging directory.
#[derive(Debug, Clone)]
pub struct MediaHandle {
    pub path: PathBuf,
    pub content_hash: String,
    pub size_bytes: u64,
    pub details: VideoDetails,
}

impl MediaHandle {
    /// Short clips go out as Reels. Unknown duration counts as long.
    pub fn is_reel(&self, reel_max_duration_s: u32) -> bool {
        self.details
            .duration_s
            .is_some_and(|d| d <= reel_max_duration_s)
    }
}

#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    /// One attempt at obtaining the media for a candidate.
    async fn acquire(&self, candidate: &VideoCandidate) -> Result<MediaHandle>;

    /// Drop the local copy once it is no longer needed.
    async fn release(&self, handle: &MediaHandle) {
        if let Err(e) = tokio::fs::remove_file(&handle.path).await {
            tracing::warn!(path = %handle.path.display(), error = %e, "failed to remove staged media");
        }
    }
}
