pub mod graph;

use crate::error::Result;
use crate::media::MediaHandle;
use crate::pages::PageConfig;
use async_trait::async_trait;

/// What goes alongside the media.
#[derive(Debug, Clone)]
pub struct PostMetadata {
    pub title: String,
    pub description: String,
    pub as_reel: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostResult {
    pub post_id: String,
    pub permalink: Option<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Token check before a page's first publish. `Auth` errors end that page.
    async fn verify(&self, _page: &PageConfig) -> Result<()> {
        Ok(())
    }

    /// One attempt at posting the media to the page.
    async fn publish(&self, page: &PageConfig, media: &MediaHandle, metadata: &PostMetadata) -> Result<PostResult>;
}
