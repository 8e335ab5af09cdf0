use super::{PostMetadata, PostResult, Publisher};
use crate::config::PublishConfig;
use crate::error::{RelayError, Result};
use crate::facebook::rest::GraphClient;
use crate::media::MediaHandle;
use crate::pages::PageConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct GraphPublisher {
    client: Arc<GraphClient>,
    processing_timeout: Duration,
    processing_poll: Duration,
}

impl GraphPublisher {
    pub fn new(client: Arc<GraphClient>, config: &PublishConfig) -> Self {
        Self {
            client,
            processing_timeout: Duration::from_secs(config.processing_timeout_s),
            processing_poll: Duration::from_secs(config.processing_poll_s.max(1)),
        }
    }
}

#[async_trait]
impl Publisher for GraphPublisher {
    async fn verify(&self, page: &PageConfig) -> Result<()> {
        self.client.verify_token(page).await
    }

    async fn publish(&self, page: &PageConfig, media: &MediaHandle, metadata: &PostMetadata) -> Result<PostResult> {
        if media.size_bytes == 0 {
            return Err(RelayError::Publish(format!("{} is empty", media.path.display())));
        }

        if metadata.as_reel {
            let video_id = self
                .client
                .upload_reel(page, &media.path, &metadata.description)
                .await?;
            let permalink = self
                .client
                .wait_until_ready(page, &video_id, self.processing_timeout, self.processing_poll)
                .await?;
            tracing::info!(page = %page.page_id, post_id = %video_id, permalink = ?permalink, "reel published");
            Ok(PostResult {
                post_id: video_id,
                permalink,
            })
        } else {
            let video_id = self
                .client
                .upload_video(page, &media.path, &metadata.description)
                .await?;
            tracing::info!(page = %page.page_id, post_id = %video_id, "video published");
            Ok(PostResult {
                permalink: Some(format!("https://facebook.com/{}", video_id)),
                post_id: video_id,
            })
        }
    }
}
