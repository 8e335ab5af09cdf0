pub mod detik;
pub mod types;

use crate::error::Result;
use crate::pages::PageConfig;
use async_trait::async_trait;
use types::VideoCandidate;

/// Source of candidate videos for a destination page.
///
/// One call is one network attempt; retries belong to the caller.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, page: &PageConfig) -> Result<Vec<VideoCandidate>>;
}
