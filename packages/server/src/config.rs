use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::jobs::JobType;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub worker: WorkerConfig,
    pub retention: RetentionConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(&lookup);

        Ok(Self {
            database_url: vars.string("DATABASE_URL"),
            openai_api_key: vars.string("OPENAI_API_KEY"),
            openai_model: vars.string("OPENAI_MODEL"),
            openai_base_url: vars.string("OPENAI_BASE_URL"),
            worker: WorkerConfig::from_vars(&vars)?,
            retention: RetentionConfig::from_vars(&vars)?,
        })
    }
}

/// Knobs for the scheduler, executors and synchronous façade.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Global cap on simultaneously executing jobs
    pub max_concurrent_jobs: usize,
    pub poll_interval: Duration,
    /// Cap on simultaneous URL fetches inside one crawl/batch/extract job
    pub max_concurrent_urls_per_job: usize,
    /// How long the synchronous façade waits for a terminal status
    pub sync_wait_timeout: Duration,
    pub sync_poll_interval: Duration,
    /// Work timeout for one page; multi-URL jobs scale it
    pub job_timeout: Duration,
    pub default_crawl_limit: usize,
    pub default_crawl_depth: usize,
    pub default_map_limit: usize,
    pub respect_robots: bool,
    pub browser_enabled: bool,
    pub user_agent: Option<String>,
    /// A claimed job that never started becomes claimable again after this,
    /// and a running job whose heartbeat is older than this is failed
    pub claim_lease: Duration,
    /// How often a running job refreshes its lease; must be shorter than it
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for in-flight jobs to record a terminal status
    pub drain_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            poll_interval: Duration::from_millis(500),
            max_concurrent_urls_per_job: 5,
            sync_wait_timeout: Duration::from_secs(60),
            sync_poll_interval: Duration::from_millis(250),
            job_timeout: Duration::from_secs(60),
            default_crawl_limit: 100,
            default_crawl_depth: 2,
            default_map_limit: 1000,
            respect_robots: true,
            browser_enabled: false,
            user_agent: None,
            claim_lease: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    fn from_vars(vars: &Vars<'_>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            max_concurrent_jobs: vars.parse("MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            poll_interval: vars.millis("JOB_POLL_INTERVAL_MS", defaults.poll_interval)?,
            max_concurrent_urls_per_job: vars
                .parse("MAX_CONCURRENT_URLS_PER_JOB", defaults.max_concurrent_urls_per_job)?,
            sync_wait_timeout: vars.millis("SYNC_WAIT_TIMEOUT_MS", defaults.sync_wait_timeout)?,
            sync_poll_interval: vars.millis("SYNC_POLL_INTERVAL_MS", defaults.sync_poll_interval)?,
            job_timeout: vars.millis("JOB_TIMEOUT_MS", defaults.job_timeout)?,
            default_crawl_limit: vars.parse("DEFAULT_CRAWL_LIMIT", defaults.default_crawl_limit)?,
            default_crawl_depth: vars.parse("DEFAULT_CRAWL_DEPTH", defaults.default_crawl_depth)?,
            default_map_limit: vars.parse("DEFAULT_MAP_LIMIT", defaults.default_map_limit)?,
            respect_robots: vars.flag("RESPECT_ROBOTS", defaults.respect_robots)?,
            browser_enabled: vars.flag("BROWSER_ENABLED", defaults.browser_enabled)?,
            user_agent: vars.string("USER_AGENT"),
            claim_lease: vars.millis("JOB_CLAIM_LEASE_MS", defaults.claim_lease)?,
            heartbeat_interval: vars.millis("JOB_HEARTBEAT_INTERVAL_MS", defaults.heartbeat_interval)?,
            drain_timeout: vars.millis("SHUTDOWN_DRAIN_TIMEOUT_MS", defaults.drain_timeout)?,
        };

        if config.max_concurrent_jobs == 0 {
            bail!("MAX_CONCURRENT_JOBS must be at least 1");
        }
        if config.max_concurrent_urls_per_job == 0 {
            bail!("MAX_CONCURRENT_URLS_PER_JOB must be at least 1");
        }
        if config.poll_interval.is_zero() {
            bail!("JOB_POLL_INTERVAL_MS must be greater than 0");
        }
        if config.heartbeat_interval.is_zero() || config.heartbeat_interval >= config.claim_lease {
            bail!("JOB_HEARTBEAT_INTERVAL_MS must be greater than 0 and shorter than JOB_CLAIM_LEASE_MS");
        }

        Ok(config)
    }
}

/// Time-to-live per job type and for documents. Zero disables a sweep.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub scrape_hours: u64,
    pub map_hours: u64,
    pub crawl_hours: u64,
    pub batch_scrape_hours: u64,
    pub extract_hours: u64,
    pub documents_hours: u64,
    /// Minimum time between two sweeps
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            scrape_hours: 24,
            map_hours: 24,
            crawl_hours: 168,
            batch_scrape_hours: 168,
            extract_hours: 72,
            documents_hours: 168,
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl RetentionConfig {
    fn from_vars(vars: &Vars<'_>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            scrape_hours: vars.parse("RETENTION_SCRAPE_HOURS", defaults.scrape_hours)?,
            map_hours: vars.parse("RETENTION_MAP_HOURS", defaults.map_hours)?,
            crawl_hours: vars.parse("RETENTION_CRAWL_HOURS", defaults.crawl_hours)?,
            batch_scrape_hours: vars
                .parse("RETENTION_BATCH_SCRAPE_HOURS", defaults.batch_scrape_hours)?,
            extract_hours: vars.parse("RETENTION_EXTRACT_HOURS", defaults.extract_hours)?,
            documents_hours: vars.parse("RETENTION_DOCUMENTS_HOURS", defaults.documents_hours)?,
            sweep_interval: Duration::from_secs(vars.parse(
                "RETENTION_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
        })
    }

    /// TTL for finished jobs of a type, `None` when sweeping is disabled.
    pub fn for_type(&self, job_type: JobType) -> Option<Duration> {
        let hours = match job_type {
            JobType::Scrape => self.scrape_hours,
            JobType::Map => self.map_hours,
            JobType::Crawl => self.crawl_hours,
            JobType::BatchScrape => self.batch_scrape_hours,
            JobType::Extract => self.extract_hours,
        };
        hours_ttl(hours)
    }

    pub fn documents(&self) -> Option<Duration> {
        hours_ttl(self.documents_hours)
    }
}

fn hours_ttl(hours: u64) -> Option<Duration> {
    (hours > 0).then(|| Duration::from_secs(hours * 3600))
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("{key} must be a valid number, got {raw:?}")),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration> {
        let ms = self.parse(key, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.string(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => bail!("{key} must be a boolean, got {v:?}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = load(&[]).unwrap();

        assert!(config.database_url.is_none());
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.worker.max_concurrent_jobs, 4);
        assert_eq!(config.worker.poll_interval, Duration::from_millis(500));
        assert_eq!(config.worker.max_concurrent_urls_per_job, 5);
        assert_eq!(config.worker.sync_wait_timeout, Duration::from_secs(60));
        assert_eq!(config.worker.default_crawl_limit, 100);
        assert_eq!(config.worker.default_map_limit, 1000);
        assert!(config.worker.respect_robots);
        assert!(!config.worker.browser_enabled);
        assert_eq!(config.retention.crawl_hours, 168);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/scrape"),
            ("MAX_CONCURRENT_JOBS", "8"),
            ("JOB_POLL_INTERVAL_MS", "100"),
            ("RESPECT_ROBOTS", "false"),
            ("BROWSER_ENABLED", "1"),
            ("RETENTION_MAP_HOURS", "0"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/scrape"));
        assert_eq!(config.worker.max_concurrent_jobs, 8);
        assert_eq!(config.worker.poll_interval, Duration::from_millis(100));
        assert!(!config.worker.respect_robots);
        assert!(config.worker.browser_enabled);
        assert_eq!(config.retention.for_type(JobType::Map), None);
        assert_eq!(
            config.retention.for_type(JobType::Scrape),
            Some(Duration::from_secs(24 * 3600))
        );
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        let err = load(&[("MAX_CONCURRENT_URLS_PER_JOB", "five")]).unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENT_URLS_PER_JOB"));

        assert!(load(&[("JOB_TIMEOUT_MS", "-1")]).is_err());
        assert!(load(&[("RESPECT_ROBOTS", "sometimes")]).is_err());
        assert!(load(&[("MAX_CONCURRENT_JOBS", "0")]).is_err());
    }

    #[test]
    fn test_heartbeat_must_fit_inside_lease() {
        let config = load(&[]).unwrap();
        assert!(config.worker.heartbeat_interval < config.worker.claim_lease);

        let err = load(&[("JOB_CLAIM_LEASE_MS", "1000"), ("JOB_HEARTBEAT_INTERVAL_MS", "1000")])
            .unwrap_err();
        assert!(err.to_string().contains("JOB_HEARTBEAT_INTERVAL_MS"));

        let config = load(&[("JOB_CLAIM_LEASE_MS", "1000"), ("JOB_HEARTBEAT_INTERVAL_MS", "250")])
            .unwrap();
        assert_eq!(config.worker.heartbeat_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("OPENAI_API_KEY", "  "), ("DEFAULT_CRAWL_DEPTH", "")]).unwrap();
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.worker.default_crawl_depth, 2);
    }
}
