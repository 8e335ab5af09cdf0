//! Per-page, per-video control flow of one relay run.
//!
//! Each (page, candidate) unit moves through
//! `Discovered -> Filtered -> Acquiring -> Acquired -> Publishing -> Published | Failed`.
//! The ledger check happens before any acquisition cost is spent, and a unit
//! is written to the ledger only after the destination confirmed the post.

use crate::caption::Captioner;
use crate::config::Config;
use crate::engine::pacing::PublishPacer;
use crate::engine::retry::{retry, RetryPolicy};
use crate::error::{RelayError, Result};
use crate::feed::types::VideoCandidate;
use crate::feed::SourceFetcher;
use crate::ledger::{Ledger, PostedRecord};
use crate::media::{MediaAcquirer, MediaHandle};
use crate::pages::PageConfig;
use crate::publish::{PostMetadata, PostResult, Publisher};
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Skip,
    Proceed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Discovered,
    Filtered(FilterDecision),
    Acquiring,
    Acquired,
    Publishing,
    Published,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `(video_id, page_id)` already in the ledger.
    AlreadyPosted,
    /// Same media bytes already posted to this page under another id.
    SameContent,
    /// Listed twice in one fetch.
    RepeatedInListing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Published { post_id: String },
    Skipped(SkipReason),
    Failed { stage: UnitState, error: String },
    /// Left for the next run: deadline, per-run cap, or page abort.
    NotStarted,
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub video_id: String,
    pub outcome: UnitOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct PageReport {
    pub page_id: String,
    pub page_name: String,
    pub units: Vec<UnitReport>,
    /// Set when the page stopped early (auth failure, fetch failure, non-retryable publish error).
    pub aborted: Option<String>,
    pub auth_aborted: bool,
}

impl PageReport {
    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.units.iter().filter(|u| pred(&u.outcome)).count()
    }

    pub fn published(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Published { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed { .. }))
    }

    pub fn not_started(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::NotStarted))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub pages: Vec<PageReport>,
    pub timed_out: bool,
}

impl RunReport {
    pub fn published(&self) -> usize {
        self.pages.iter().map(|p| p.published()).sum()
    }

    pub fn skipped(&self) -> usize {
        self.pages.iter().map(|p| p.skipped()).sum()
    }

    pub fn failed(&self) -> usize {
        self.pages.iter().map(|p| p.failed()).sum()
    }

    pub fn not_started(&self) -> usize {
        self.pages.iter().map(|p| p.not_started()).sum()
    }

    pub fn page(&self, page_id: &str) -> Option<&PageReport> {
        self.pages.iter().find(|p| p.page_id == page_id)
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub retry: RetryPolicy,
    pub upload_delay: Duration,
    pub upload_jitter: Duration,
    pub run_timeout: Duration,
    /// Publishes per page per run; 0 means no cap.
    pub max_uploads_per_page: usize,
    pub page_concurrency: usize,
    pub reel_max_duration_s: u32,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            upload_delay: config.upload_delay(),
            upload_jitter: Duration::from_secs(config.publish.upload_jitter_s),
            run_timeout: config.run_timeout(),
            max_uploads_per_page: config.schedule.max_uploads_per_run,
            page_concurrency: config.schedule.page_concurrency.max(1),
            reel_max_duration_s: config.publish.reel_max_duration_s,
        }
    }
}

async fn before<T>(deadline: Instant, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::Timeout(what.to_string())),
    }
}

pub struct Orchestrator {
    source: Arc<dyn SourceFetcher>,
    acquirer: Arc<dyn MediaAcquirer>,
    publisher: Arc<dyn Publisher>,
    captioner: Arc<Captioner>,
    ledger: Arc<Mutex<Ledger>>,
    settings: RunSettings,
    halted: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceFetcher>,
        acquirer: Arc<dyn MediaAcquirer>,
        publisher: Arc<dyn Publisher>,
        captioner: Arc<Captioner>,
        ledger: Ledger,
        settings: RunSettings,
    ) -> Self {
        Self {
            source,
            acquirer,
            publisher,
            captioner,
            ledger: Arc::new(Mutex::new(ledger)),
            settings,
            halted: AtomicBool::new(false),
        }
    }

    /// Shared handle to the ledger, e.g. to inspect it after a run.
    pub fn ledger(&self) -> Arc<Mutex<Ledger>> {
        self.ledger.clone()
    }

    /// Process every page. Per-unit failures are reported, not returned;
    /// only a ledger persistence failure makes the run itself fail.
    pub async fn run(&self, pages: &[PageConfig]) -> Result<RunReport> {
        self.halted.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + self.settings.run_timeout;

        let results: Vec<Result<PageReport>> = stream::iter(pages.iter())
            .map(|page| self.run_page(page, deadline))
            .buffered(self.settings.page_concurrency)
            .collect()
            .await;

        let mut report = RunReport {
            timed_out: Instant::now() >= deadline,
            ..Default::default()
        };
        for result in results {
            report.pages.push(result?);
        }
        tracing::info!(
            pages = report.pages.len(),
            published = report.published(),
            skipped = report.skipped(),
            failed = report.failed(),
            not_started = report.not_started(),
            timed_out = report.timed_out,
            "run finished"
        );
        Ok(report)
    }

    fn ledger_lock(&self) -> Result<std::sync::MutexGuard<'_, Ledger>> {
        self.ledger.lock().map_err(|_| RelayError::Persistence {
            path: "ledger".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "ledger lock poisoned"),
        })
    }

    async fn run_page(&self, page: &PageConfig, deadline: Instant) -> Result<PageReport> {
        let mut report = PageReport {
            page_id: page.page_id.clone(),
            page_name: page.page_name.clone(),
            ..Default::default()
        };

        if self.halted.load(Ordering::SeqCst) {
            report.aborted = Some("run halted before page started".into());
            return Ok(report);
        }
        if Instant::now() >= deadline {
            report.aborted = Some("run deadline reached before page started".into());
            return Ok(report);
        }

        let policy = self.settings.retry;
        let candidates = match before(
            deadline,
            "fetch",
            retry(&policy, "fetch", |_| self.source.fetch(page)),
        )
        .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(page = %page.label(), error = %e, "fetch failed, skipping page this run");
                report.aborted = Some(e.to_string());
                return Ok(report);
            }
        };
        tracing::info!(page = %page.label(), candidates = candidates.len(), "processing page");

        let pacer = PublishPacer::new(self.settings.upload_delay, self.settings.upload_jitter);
        let mut seen = HashSet::new();
        let mut verified = false;
        let mut queue = candidates.into_iter();

        while let Some(candidate) = queue.next() {
            let stop = if self.halted.load(Ordering::SeqCst) {
                Some("run halted")
            } else if Instant::now() >= deadline {
                Some("run deadline reached")
            } else if self.settings.max_uploads_per_page > 0
                && report.published() >= self.settings.max_uploads_per_page
            {
                Some("per-run upload cap reached")
            } else {
                None
            };
            if let Some(why) = stop {
                tracing::info!(page = %page.page_id, remaining = queue.len() + 1, why, "leaving remaining candidates for next run");
                Self::defer(&mut report, candidate, queue);
                break;
            }

            // Discovered -> Filtered: the only dedup gate ahead of acquisition
            if !seen.insert(candidate.video_id.clone()) {
                Self::push(&mut report, &candidate, UnitOutcome::Skipped(SkipReason::RepeatedInListing));
                continue;
            }
            let posted = self.ledger_lock()?.contains(&candidate.video_id, &page.page_id);
            if posted {
                tracing::debug!(page = %page.page_id, video_id = %candidate.video_id, state = ?UnitState::Filtered(FilterDecision::Skip), "already posted");
                Self::push(&mut report, &candidate, UnitOutcome::Skipped(SkipReason::AlreadyPosted));
                continue;
            }
            tracing::debug!(page = %page.page_id, video_id = %candidate.video_id, state = ?UnitState::Filtered(FilterDecision::Proceed), "new candidate");

            if !verified {
                match before(deadline, "token check", retry(&policy, "verify", |_| self.publisher.verify(page))).await {
                    Ok(()) => verified = true,
                    Err(e) => {
                        tracing::error!(page = %page.label(), error = %e, "page unusable, aborting its queue");
                        report.auth_aborted = matches!(e, RelayError::Auth { .. });
                        report.aborted = Some(e.to_string());
                        Self::defer(&mut report, candidate, queue);
                        break;
                    }
                }
            }

            match self.process_unit(page, &candidate, &pacer, deadline).await {
                Ok(outcome) => Self::push(&mut report, &candidate, outcome),
                Err(UnitError::Dropped(outcome)) => Self::push(&mut report, &candidate, outcome),
                Err(UnitError::AbortPage(outcome, e)) => {
                    tracing::error!(page = %page.label(), error = %e, "aborting page for this run");
                    report.auth_aborted = matches!(e, RelayError::Auth { .. });
                    report.aborted = Some(e.to_string());
                    Self::push(&mut report, &candidate, outcome);
                    Self::defer_rest(&mut report, queue);
                    break;
                }
                Err(UnitError::Fatal(e)) => {
                    self.halted.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        tracing::info!(
            page = %page.label(),
            published = report.published(),
            skipped = report.skipped(),
            failed = report.failed(),
            not_started = report.not_started(),
            "page done"
        );
        Ok(report)
    }

    /// Acquire -> publish -> record for one unit that passed the ledger gate.
    async fn process_unit(
        &self,
        page: &PageConfig,
        candidate: &VideoCandidate,
        pacer: &PublishPacer,
        deadline: Instant,
    ) -> std::result::Result<UnitOutcome, UnitError> {
        let policy = self.settings.retry;
        let failed = |stage: UnitState, e: &RelayError| {
            tracing::warn!(page = %page.page_id, video_id = %candidate.video_id, state = ?stage, error = %e, "unit failed, left unrecorded");
            UnitOutcome::Failed {
                stage,
                error: e.to_string(),
            }
        };

        tracing::debug!(page = %page.page_id, video_id = %candidate.video_id, state = ?UnitState::Acquiring, "acquiring");
        let media = before(
            deadline,
            "acquire",
            retry(&policy, "acquire", |_| self.acquirer.acquire(candidate)),
        )
        .await
        .map_err(|e| UnitError::Dropped(failed(UnitState::Acquiring, &e)))?;
        tracing::debug!(page = %page.page_id, video_id = %candidate.video_id, state = ?UnitState::Acquired, "acquired");

        let hash_known = self
            .ledger_lock()
            .map_err(UnitError::Fatal)?
            .contains_hash(&media.content_hash, &page.page_id);
        if hash_known {
            tracing::info!(page = %page.page_id, video_id = %candidate.video_id, hash = %media.content_hash, "same clip already posted");
            self.acquirer.release(&media).await;
            return Ok(UnitOutcome::Skipped(SkipReason::SameContent));
        }

        let description = match before(deadline, "caption", async {
            Ok(self.captioner.describe(candidate, &media.details).await)
        })
        .await
        {
            Ok(d) => d,
            Err(e) => return Err(UnitError::Dropped(failed(UnitState::Acquired, &e))),
        };
        let metadata = PostMetadata {
            title: if media.details.title.is_empty() {
                candidate.title.clone()
            } else {
                media.details.title.clone()
            },
            description,
            as_reel: media.is_reel(self.settings.reel_max_duration_s),
        };

        let published = before(
            deadline,
            "publish",
            retry(&policy, "publish", |attempt| {
                let metadata = &metadata;
                let media = &media;
                async move {
                    pacer.wait_turn().await;
                    tracing::info!(page = %page.page_id, video_id = %candidate.video_id, attempt, reel = metadata.as_reel, state = ?UnitState::Publishing, "publishing");
                    self.publisher.publish(page, media, metadata).await
                }
            }),
        )
        .await;

        let result = match published {
            Ok(r) => r,
            Err(e) if !e.is_retryable() && !matches!(e, RelayError::Timeout(_)) => {
                let outcome = failed(UnitState::Publishing, &e);
                return Err(UnitError::AbortPage(outcome, e));
            }
            Err(e) => return Err(UnitError::Dropped(failed(UnitState::Publishing, &e))),
        };

        self.record(page, candidate, &media, &metadata, &result)
            .map_err(UnitError::Fatal)?;
        tracing::info!(page = %page.page_id, video_id = %candidate.video_id, post_id = %result.post_id, state = ?UnitState::Published, "published and recorded");
        self.acquirer.release(&media).await;
        Ok(UnitOutcome::Published {
            post_id: result.post_id,
        })
    }

    fn record(
        &self,
        page: &PageConfig,
        candidate: &VideoCandidate,
        media: &MediaHandle,
        metadata: &PostMetadata,
        result: &PostResult,
    ) -> Result<()> {
        let mut entry = PostedRecord::new(&candidate.video_id, &page.page_id, chrono::Utc::now());
        entry.post_id = Some(result.post_id.clone());
        entry.content_hash = Some(media.content_hash.clone());
        entry.title = Some(metadata.title.clone());
        let mut ledger = self.ledger_lock()?;
        if let Err(e) = ledger.record_entry(entry) {
            tracing::error!(page = %page.page_id, video_id = %candidate.video_id, post_id = %result.post_id, error = %e, "published but NOT recorded");
            return Err(e);
        }
        Ok(())
    }

    fn push(report: &mut PageReport, candidate: &VideoCandidate, outcome: UnitOutcome) {
        report.units.push(UnitReport {
            video_id: candidate.video_id.clone(),
            outcome,
        });
    }

    fn defer(report: &mut PageReport, current: VideoCandidate, rest: impl Iterator<Item = VideoCandidate>) {
        Self::push(report, &current, UnitOutcome::NotStarted);
        Self::defer_rest(report, rest);
    }

    fn defer_rest(report: &mut PageReport, rest: impl Iterator<Item = VideoCandidate>) {
        for candidate in rest {
            Self::push(report, &candidate, UnitOutcome::NotStarted);
        }
    }
}

enum UnitError {
    /// Unit failed; the page continues.
    Dropped(UnitOutcome),
    /// Unit failed and the page's remaining queue is abandoned for this run.
    AbortPage(UnitOutcome, RelayError),
    /// The run cannot continue.
    Fatal(RelayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, outcome: UnitOutcome) -> UnitReport {
        UnitReport {
            video_id: id.into(),
            outcome,
        }
    }

    #[test]
    fn test_report_counts() {
        let page = PageReport {
            page_id: "p1".into(),
            page_name: "P".into(),
            units: vec![
                unit("a", UnitOutcome::Published { post_id: "1".into() }),
                unit("b", UnitOutcome::Skipped(SkipReason::AlreadyPosted)),
                unit("c", UnitOutcome::Failed { stage: UnitState::Acquiring, error: "x".into() }),
                unit("d", UnitOutcome::NotStarted),
                unit("e", UnitOutcome::NotStarted),
            ],
            aborted: None,
            auth_aborted: false,
        };
        assert_eq!(page.published(), 1);
        assert_eq!(page.skipped(), 1);
        assert_eq!(page.failed(), 1);
        assert_eq!(page.not_started(), 2);

        let run = RunReport {
            pages: vec![page.clone(), page],
            timed_out: false,
        };
        assert_eq!(run.published(), 2);
        assert_eq!(run.not_started(), 4);
        assert!(run.page("p1").is_some());
        assert!(run.page("p2").is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.retry.max_retries = 4;
        config.publish.upload_delay_s = 12;
        config.schedule.page_concurrency = 0;
        let settings = RunSettings::from_config(&config);
        assert_eq!(settings.retry.max_attempts, 4);
        assert_eq!(settings.upload_delay, Duration::from_secs(12));
        assert_eq!(settings.retry.rate_limit_wait, Duration::from_secs(12));
        assert_eq!(settings.page_concurrency, 1);
    }
}
