use crate::error::{RelayError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_FILE: &str = ".env";

pub const DEFAULT_BASE_URL: &str = "https://20.detik.com/detikupdate";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub caption: CaptionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String { DEFAULT_BASE_URL.to_string() }
fn default_user_agent() -> String { DEFAULT_USER_AGENT.to_string() }
fn default_request_timeout() -> u64 { 20_000 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// Cadence of `--watch` mode. Informational for single CI runs.
    #[serde(default = "default_check_interval")]
    pub check_interval_s: u64,
    /// Hard budget for one run; unstarted work waits for the next run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_s: u64,
    #[serde(default = "default_max_uploads")]
    pub max_uploads_per_run: usize,
    #[serde(default = "default_page_concurrency")]
    pub page_concurrency: usize,
}

fn default_check_interval() -> u64 { 14_400 }
fn default_run_timeout() -> u64 { 3_000 }
fn default_max_uploads() -> usize { 3 }
fn default_page_concurrency() -> usize { 1 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_s: default_check_interval(),
            run_timeout_s: default_run_timeout(),
            max_uploads_per_run: default_max_uploads(),
            page_concurrency: default_page_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Total attempts per network operation, first one included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_retries() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 10_000 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_upload_delay")]
    pub upload_delay_s: u64,
    /// Random extra wait added on top of `upload_delay_s`.
    #[serde(default = "default_upload_jitter")]
    pub upload_jitter_s: u64,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_graph_base")]
    pub graph_base: String,
    #[serde(default = "default_graph_video_base")]
    pub graph_video_base: String,
    #[serde(default = "default_rupload_base")]
    pub rupload_base: String,
    #[serde(default = "default_call_budget")]
    pub hourly_call_budget: u32,
    #[serde(default = "default_reel_max_duration")]
    pub reel_max_duration_s: u32,
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_s: u64,
    #[serde(default = "default_processing_poll")]
    pub processing_poll_s: u64,
    /// Whole-request limit for the two media uploads. Other Graph calls use
    /// `source.request_timeout_ms`.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_s: u64,
}

fn default_upload_delay() -> u64 { 30 }
fn default_upload_jitter() -> u64 { 10 }
fn default_api_version() -> String { "v20.0".to_string() }
fn default_graph_base() -> String { "https://graph.facebook.com".to_string() }
fn default_graph_video_base() -> String { "https://graph-video.facebook.com".to_string() }
fn default_rupload_base() -> String { "https://rupload.facebook.com".to_string() }
fn default_call_budget() -> u32 { 180 }
fn default_reel_max_duration() -> u32 { 60 }
fn default_processing_timeout() -> u64 { 300 }
fn default_processing_poll() -> u64 { 30 }
fn default_upload_timeout() -> u64 { 1800 }

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            upload_delay_s: default_upload_delay(),
            upload_jitter_s: default_upload_jitter(),
            api_version: default_api_version(),
            graph_base: default_graph_base(),
            graph_video_base: default_graph_video_base(),
            rupload_base: default_rupload_base(),
            hourly_call_budget: default_call_budget(),
            reel_max_duration_s: default_reel_max_duration(),
            processing_timeout_s: default_processing_timeout(),
            processing_poll_s: default_processing_poll(),
            upload_timeout_s: default_upload_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    #[serde(default = "default_pages_file")]
    pub pages_file: PathBuf,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_pages_file() -> PathBuf { PathBuf::from("facebook_pages.json") }
fn default_ledger_file() -> PathBuf { PathBuf::from("posted_videos.json") }
fn default_download_dir() -> PathBuf { PathBuf::from("downloaded_videos") }

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            pages_file: default_pages_file(),
            ledger_file: default_ledger_file(),
            download_dir: default_download_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_ytdlp")]
    pub ytdlp_path: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_ytdlp() -> String { "yt-dlp".to_string() }
fn default_format() -> String { "bestvideo[height<=1080]+bestaudio/best".to_string() }

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp(),
            format: default_format(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptionConfig {
    #[serde(default = "default_caption_api")]
    pub api_base: String,
    #[serde(default = "default_caption_model")]
    pub model: String,
    #[serde(default = "default_caption_length")]
    pub max_length: usize,
}

fn default_caption_api() -> String { "https://api.openai.com/v1".to_string() }
fn default_caption_model() -> String { "gpt-4o-mini".to_string() }
fn default_caption_length() -> usize { 150 }

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            api_base: default_caption_api(),
            model: default_caption_model(),
            max_length: default_caption_length(),
        }
    }
}

impl Config {
    /// Read settings from a TOML file. A missing file at the default location
    /// means "all defaults"; a missing file the operator asked for is an error.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                return Err(RelayError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RelayError::Config(format!("failed to parse config TOML: {}", e)))
    }

    /// Apply the recognized environment overrides on top of file settings.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| sanitize_key(&v)).filter(|v| !v.is_empty());

        if let Some(v) = get("CHECK_INTERVAL") {
            self.schedule.check_interval_s = parse_number("CHECK_INTERVAL", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.retry.max_retries = parse_number("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("UPLOAD_DELAY") {
            self.publish.upload_delay_s = parse_number("UPLOAD_DELAY", &v)?;
        }
        if let Some(v) = get("RUN_TIMEOUT") {
            self.schedule.run_timeout_s = parse_number("RUN_TIMEOUT", &v)?;
        }
        if let Some(v) = get("BASE_URL") {
            self.source.base_url = v;
        }
        if let Some(v) = get("FB_PAGES_FILE") {
            self.files.pages_file = PathBuf::from(v);
        }
        if let Some(v) = get("DATA_FILE") {
            self.files.ledger_file = PathBuf::from(v);
        }
        if let Some(v) = get("DOWNLOAD_DIR") {
            self.files.download_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 {
            return Err(RelayError::Config("MAX_RETRIES must be at least 1".into()));
        }
        if self.schedule.page_concurrency == 0 {
            return Err(RelayError::Config("page_concurrency must be at least 1".into()));
        }
        if self.publish.upload_timeout_s == 0 {
            return Err(RelayError::Config("upload_timeout_s must be positive".into()));
        }
        if self.schedule.run_timeout_s == 0 {
            return Err(RelayError::Config("RUN_TIMEOUT must be positive".into()));
        }
        url::Url::parse(&self.source.base_url)
            .map_err(|e| RelayError::Config(format!("invalid BASE_URL {}: {}", self.source.base_url, e)))?;
        Ok(())
    }

    pub fn upload_delay(&self) -> Duration {
        Duration::from_secs(self.publish.upload_delay_s)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.schedule.run_timeout_s)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.publish.upload_timeout_s)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.source.request_timeout_ms)
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        // Strip BOM if present (common on Windows-created files)
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        for (key, value) in parse_env_lines(content) {
            if std::env::var(&key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }

    /// Secret for the optional AI captioning step.
    pub fn openai_api_key() -> Option<String> {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Some(sanitize_key(&key)),
            _ => None,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| RelayError::Config(format!("{} must be a non-negative integer, got {:?}", key, value)))
}

fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim().trim_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            out.push((key.to_string(), value.to_string()));
        }
    }
    out
}

/// Strip carriage returns, BOM, and other invisible chars from a key/path value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_parses() {
        let config = Config::load(Path::new("relay.toml"), true).unwrap();
        assert_eq!(config.source.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.publish.upload_delay_s, 30);
        assert_eq!(config.schedule.max_uploads_per_run, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_optional_file_gives_defaults() {
        let config = Config::load(Path::new("does-not-exist.toml"), false).unwrap();
        assert_eq!(config.schedule.check_interval_s, 14_400);
        assert_eq!(config.files.ledger_file, PathBuf::from("posted_videos.json"));
    }

    #[test]
    fn test_missing_required_file_is_config_error() {
        let err = Config::load(Path::new("does-not-exist.toml"), true).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml("[retry]\nmax_retries = 5\n").unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_ms, 10_000);
        assert_eq!(config.publish.api_version, "v20.0");
    }

    #[test]
    fn test_upload_timeout_separate_from_request_timeout() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(20));
        assert_eq!(config.upload_timeout(), Duration::from_secs(1800));

        let tuned = Config::from_toml("[publish]\nupload_timeout_s = 600\n").unwrap();
        assert_eq!(tuned.upload_timeout(), Duration::from_secs(600));
        let zero = Config::from_toml("[publish]\nupload_timeout_s = 0\n").unwrap();
        assert!(matches!(zero.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CHECK_INTERVAL", "3600"),
            ("MAX_RETRIES", "5"),
            ("UPLOAD_DELAY", " 12\r"),
            ("BASE_URL", "https://example.com/videos"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.schedule.check_interval_s, 3600);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.publish.upload_delay_s, 12);
        assert_eq!(config.source.base_url, "https://example.com/videos");
    }

    #[test]
    fn test_non_numeric_override_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "MAX_RETRIES").then(|| "three".to_string()))
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_lines() {
        let parsed = parse_env_lines("# comment\nA=1\n\nB = \"two\"\r\nbroken\n");
        assert_eq!(
            parsed,
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "two".to_string())]
        );
    }
}
