//! In-memory stand-ins for the network-facing components.
#![allow(dead_code)]

use async_trait::async_trait;
use detik_relay::caption::Captioner;
use detik_relay::config::CaptionConfig;
use detik_relay::engine::retry::RetryPolicy;
use detik_relay::error::{RelayError, Result};
use detik_relay::feed::types::{VideoCandidate, VideoDetails};
use detik_relay::feed::SourceFetcher;
use detik_relay::ledger::Ledger;
use detik_relay::media::{MediaAcquirer, MediaHandle};
use detik_relay::pages::PageConfig;
use detik_relay::pipeline::{Orchestrator, RunSettings};
use detik_relay::publish::{PostMetadata, PostResult, Publisher};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub fn page(id: &str) -> PageConfig {
    PageConfig::new(id, &format!("Page {}", id), &format!("EAAtoken-for-{}", id)).unwrap()
}

pub fn candidate(n: u32) -> VideoCandidate {
    let url = format!("https://20.detik.com/detikupdate/d-{}/video-{}", 7000 + n, n);
    VideoCandidate::new(&url, &format!("Video {}", n), &url)
}

pub fn candidates(count: u32) -> Vec<VideoCandidate> {
    (1..=count).map(candidate).collect()
}

pub fn settings() -> RunSettings {
    RunSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            rate_limit_wait: Duration::from_secs(30),
        },
        upload_delay: Duration::from_secs(30),
        upload_jitter: Duration::ZERO,
        run_timeout: Duration::from_secs(3000),
        max_uploads_per_page: 0,
        page_concurrency: 1,
        reel_max_duration_s: 60,
    }
}

pub fn orchestrator(
    source: &Arc<FakeSource>,
    acquirer: &Arc<FakeAcquirer>,
    publisher: &Arc<FakePublisher>,
    ledger: Ledger,
    settings: RunSettings,
) -> Orchestrator {
    Orchestrator::new(
        source.clone(),
        acquirer.clone(),
        publisher.clone(),
        Arc::new(Captioner::offline(CaptionConfig::default()).unwrap()),
        ledger,
        settings,
    )
}

// ── Source ───────────────────────────────────────────────────────────

pub struct FakeSource {
    listing: Vec<VideoCandidate>,
    broken_pages: HashSet<String>,
    fetches: AtomicU32,
}

impl FakeSource {
    pub fn new(listing: Vec<VideoCandidate>) -> Self {
        Self {
            listing,
            broken_pages: HashSet::new(),
            fetches: AtomicU32::new(0),
        }
    }

    /// Fetching for this page reports a changed page structure.
    pub fn broken_for(mut self, page_id: &str) -> Self {
        self.broken_pages.insert(page_id.to_string());
        self
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for FakeSource {
    async fn fetch(&self, page: &PageConfig) -> Result<Vec<VideoCandidate>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.broken_pages.contains(&page.page_id) {
            return Err(RelayError::Parse("no article.list-content__item".into()));
        }
        Ok(self.listing.clone())
    }
}

// ── Acquirer ─────────────────────────────────────────────────────────

pub struct FakeAcquirer {
    calls: Mutex<Vec<String>>,
    transient_failures: AtomicU32,
    permanent_failure: bool,
    hashes: HashMap<String, String>,
    duration_s: Option<u32>,
}

impl FakeAcquirer {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            transient_failures: AtomicU32::new(0),
            permanent_failure: false,
            hashes: HashMap::new(),
            duration_s: Some(120),
        }
    }

    /// The first `n` acquire calls fail with a retryable error.
    pub fn failing_first(n: u32) -> Self {
        let acquirer = Self::new();
        acquirer.transient_failures.store(n, Ordering::SeqCst);
        acquirer
    }

    pub fn always_unavailable() -> Self {
        Self {
            permanent_failure: true,
            ..Self::new()
        }
    }

    pub fn with_hash(mut self, video_id: &str, hash: &str) -> Self {
        self.hashes.insert(video_id.to_string(), hash.to_string());
        self
    }

    pub fn with_duration(mut self, duration_s: Option<u32>) -> Self {
        self.duration_s = duration_s;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaAcquirer for FakeAcquirer {
    async fn acquire(&self, candidate: &VideoCandidate) -> Result<MediaHandle> {
        self.calls.lock().unwrap().push(candidate.video_id.clone());
        if self.permanent_failure {
            return Err(RelayError::unavailable("no media URL on detail page"));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RelayError::acquire("connection reset by peer"));
        }
        let content_hash = self
            .hashes
            .get(&candidate.video_id)
            .cloned()
            .unwrap_or_else(|| format!("hash-of-{}", candidate.video_id));
        Ok(MediaHandle {
            path: PathBuf::from(format!("staged/{}.mp4", candidate.title.replace(' ', "_"))),
            content_hash,
            size_bytes: 1024,
            details: VideoDetails {
                title: candidate.title.clone(),
                description: format!("Isi {}", candidate.title),
                keywords: vec!["berita".into()],
                duration_s: self.duration_s,
                media_url: Some("https://cdn.detik.com/clip.m3u8".into()),
            },
        })
    }

    async fn release(&self, _handle: &MediaHandle) {}
}

// ── Publisher ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PublishCall {
    pub page_id: String,
    pub title: String,
    pub description: String,
    pub as_reel: bool,
    pub at: Instant,
}

pub struct FakePublisher {
    calls: Mutex<Vec<PublishCall>>,
    rejected_tokens: HashSet<String>,
    revoked_on_publish: HashSet<String>,
    broken_titles: HashSet<String>,
    transient_failures: AtomicU32,
    rate_limits: AtomicU32,
    next_id: AtomicU32,
}

impl FakePublisher {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            rejected_tokens: HashSet::new(),
            revoked_on_publish: HashSet::new(),
            broken_titles: HashSet::new(),
            transient_failures: AtomicU32::new(0),
            rate_limits: AtomicU32::new(0),
            next_id: AtomicU32::new(1),
        }
    }

    /// Token check fails for this page.
    pub fn rejecting(mut self, page_id: &str) -> Self {
        self.rejected_tokens.insert(page_id.to_string());
        self
    }

    /// Token check passes but every publish to this page fails auth.
    pub fn revoked_on_publish(mut self, page_id: &str) -> Self {
        self.revoked_on_publish.insert(page_id.to_string());
        self
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// The first `n` publish calls are throttled by the destination.
    pub fn rate_limited_first(self, n: u32) -> Self {
        self.rate_limits.store(n, Ordering::SeqCst);
        self
    }

    /// Every publish of the video with this title fails with a retryable error.
    pub fn always_failing(mut self, title: &str) -> Self {
        self.broken_titles.insert(title.to_string());
        self
    }

    pub fn calls(&self) -> Vec<PublishCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, page_id: &str) -> Vec<PublishCall> {
        self.calls().into_iter().filter(|c| c.page_id == page_id).collect()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn verify(&self, page: &PageConfig) -> Result<()> {
        if self.rejected_tokens.contains(&page.page_id) {
            return Err(RelayError::Auth {
                page: page.page_id.clone(),
                message: "Error validating access token".into(),
            });
        }
        Ok(())
    }

    async fn publish(&self, page: &PageConfig, _media: &MediaHandle, metadata: &PostMetadata) -> Result<PostResult> {
        self.calls.lock().unwrap().push(PublishCall {
            page_id: page.page_id.clone(),
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            as_reel: metadata.as_reel,
            at: Instant::now(),
        });
        if self.revoked_on_publish.contains(&page.page_id) {
            return Err(RelayError::Auth {
                page: page.page_id.clone(),
                message: "session expired".into(),
            });
        }
        if self.broken_titles.contains(&metadata.title) {
            return Err(RelayError::Publish("An unknown error occurred".into()));
        }
        let throttled = self.rate_limits.load(Ordering::SeqCst);
        if throttled > 0 {
            self.rate_limits.store(throttled - 1, Ordering::SeqCst);
            return Err(RelayError::RateLimit("(#32) Page request limit reached".into()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RelayError::Publish("An unknown error occurred".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(PostResult {
            post_id: format!("post-{}", id),
            permalink: None,
        })
    }
}
