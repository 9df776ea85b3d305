//! Backfill configuration types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::checkpoint::FileCheckpointStore;
use super::error::{PipelineError, PipelineResult};

/// Default prefix for the target bus name
pub const DEFAULT_RESOURCE_PREFIX: &str = "heidi-";
/// Region the organization health API is served from
pub const DEFAULT_HEALTH_REGION: &str = "us-east-1";
/// Page size for account and entity listings
pub const DEFAULT_FANOUT_PAGE_SIZE: u32 = 50;
/// Source tag on published entries
pub const DEFAULT_EVENT_SOURCE: &str = "heidi.health";
/// Detail-type tag on published entries
pub const DEFAULT_DETAIL_TYPE: &str = "awshealthtest";

/// First delay before re-issuing a failed event page, doubled per attempt
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Largest page size the upstream listings accept
const MAX_PAGE_SIZE: u32 = 100;

/// Main backfill configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Account that owns the target bus
    pub account_id: String,
    /// Region of the target bus
    pub region: String,
    /// Prefix of the target bus name
    pub resource_prefix: String,
    /// Region used for health API calls
    pub health_region: String,
    /// Directory holding the checkpoint file
    pub checkpoint_dir: PathBuf,
    /// Page-size hint for the outer event listing
    pub event_page_size: Option<u32>,
    /// Page size for account and entity listings
    pub fanout_page_size: u32,
    /// Source tag on published entries
    pub event_source: String,
    /// Detail-type tag on published entries
    pub detail_type: String,
    /// Explicit bus ARN, overriding the derived one
    pub event_bus_arn: Option<String>,
    /// Stop after this many outer pages
    pub max_pages: Option<u64>,
    /// What to do when an outer page fetch fails
    pub fetch_error_policy: FetchErrorPolicy,
    /// Base delay between retries of a failed event page
    pub retry_backoff_ms: u64,
    /// Show a progress spinner
    pub show_progress: bool,
    /// Print entries instead of publishing them
    pub dry_run: bool,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            region: String::new(),
            resource_prefix: DEFAULT_RESOURCE_PREFIX.to_string(),
            health_region: DEFAULT_HEALTH_REGION.to_string(),
            checkpoint_dir: PathBuf::from("."),
            event_page_size: None,
            fanout_page_size: DEFAULT_FANOUT_PAGE_SIZE,
            event_source: DEFAULT_EVENT_SOURCE.to_string(),
            detail_type: DEFAULT_DETAIL_TYPE.to_string(),
            event_bus_arn: None,
            max_pages: None,
            fetch_error_policy: FetchErrorPolicy::default(),
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            show_progress: false,
            dry_run: false,
        }
    }
}

impl BackfillConfig {
    /// Create a config for the bus in `account_id` / `region`
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            ..Self::default()
        }
    }

    /// Load a config from a TOML file
    pub fn from_toml_file(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::io_with_path(path, "reading config", e))?;
        Self::from_toml_str(&text)
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        toml::from_str(text).map_err(|e| PipelineError::ConfigError(e.to_string()))
    }

    /// Set the resource prefix
    pub fn with_resource_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.resource_prefix = prefix.into();
        self
    }

    /// Set the health API region
    pub fn with_health_region(mut self, region: impl Into<String>) -> Self {
        self.health_region = region.into();
        self
    }

    /// Set the checkpoint directory
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    /// Set the outer page-size hint
    pub fn with_event_page_size(mut self, size: u32) -> Self {
        self.event_page_size = Some(size);
        self
    }

    /// Set the account/entity page size
    pub fn with_fanout_page_size(mut self, size: u32) -> Self {
        self.fanout_page_size = size;
        self
    }

    /// Set an explicit bus ARN
    pub fn with_event_bus_arn(mut self, arn: impl Into<String>) -> Self {
        self.event_bus_arn = Some(arn.into());
        self
    }

    /// Set the source and detail-type tags
    pub fn with_tags(mut self, source: impl Into<String>, detail_type: impl Into<String>) -> Self {
        self.event_source = source.into();
        self.detail_type = detail_type.into();
        self
    }

    /// Bound the run to `pages` outer pages
    pub fn with_max_pages(mut self, pages: u64) -> Self {
        self.max_pages = Some(pages);
        self
    }

    /// Set the outer fetch error policy
    pub fn with_fetch_error_policy(mut self, policy: FetchErrorPolicy) -> Self {
        self.fetch_error_policy = policy;
        self
    }

    /// Set the base retry delay
    pub fn with_retry_backoff_ms(mut self, millis: u64) -> Self {
        self.retry_backoff_ms = millis;
        self
    }

    /// Delay before retry number `attempt + 1`: 100ms, 200ms, 400ms, ...
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Enable the progress spinner
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Enable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Target bus ARN, explicit or derived from region, account and prefix
    pub fn event_bus_arn(&self) -> String {
        match &self.event_bus_arn {
            Some(arn) => arn.clone(),
            None => format!(
                "arn:aws:events:{region}:{account}:event-bus/{prefix}DataCollectionBus-{account}",
                region = self.region,
                account = self.account_id,
                prefix = self.resource_prefix,
            ),
        }
    }

    /// Checkpoint file for this account
    pub fn checkpoint_path(&self) -> PathBuf {
        FileCheckpointStore::default_path(&self.checkpoint_dir, &self.account_id)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.account_id.trim().is_empty() {
            return Err("Account id is required".to_string());
        }
        if self.event_bus_arn.is_none() && self.region.trim().is_empty() {
            return Err("Region is required to derive the event bus ARN".to_string());
        }
        if self.event_source.is_empty() || self.detail_type.is_empty() {
            return Err("Event source and detail type must not be empty".to_string());
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.fanout_page_size) {
            return Err(format!(
                "Fan-out page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.fanout_page_size
            ));
        }
        if let Some(size) = self.event_page_size {
            if !(1..=MAX_PAGE_SIZE).contains(&size) {
                return Err(format!(
                    "Event page size must be between 1 and {MAX_PAGE_SIZE}, got {size}"
                ));
            }
        }
        if self.max_pages == Some(0) {
            return Err("max_pages must be at least 1".to_string());
        }
        if let FetchErrorPolicy::Retry { attempts: 0 } = self.fetch_error_policy {
            return Err("Retry policy needs at least one attempt".to_string());
        }
        Ok(())
    }
}

/// What the driver does when an outer page fetch fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FetchErrorPolicy {
    /// Treat the failure as the end of the listing and clear the checkpoint
    #[default]
    Finish,
    /// Stop the run and keep the checkpoint
    Abort,
    /// Re-issue the same cursor up to `attempts` times, then abort
    Retry { attempts: u32 },
}

impl FetchErrorPolicy {
    /// Get policy name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Finish => "finish",
            Self::Abort => "abort",
            Self::Retry { .. } => "retry",
        }
    }
}

impl std::fmt::Display for FetchErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry { attempts } => write!(f, "retry:{attempts}"),
            other => write!(f, "{}", other.name()),
        }
    }
}

impl std::str::FromStr for FetchErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        match lower.split_once(':') {
            None => match lower.as_str() {
                "finish" => Ok(Self::Finish),
                "abort" => Ok(Self::Abort),
                "retry" => Ok(Self::Retry { attempts: 3 }),
                _ => Err(format!("Unknown fetch error policy: {s}")),
            },
            Some(("retry", n)) => n
                .parse()
                .map(|attempts| Self::Retry { attempts })
                .map_err(|_| format!("Invalid retry attempts: {n}")),
            Some(_) => Err(format!("Unknown fetch error policy: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_config_default() {
        let config = BackfillConfig::default();
        assert_eq!(config.resource_prefix, "heidi-");
        assert_eq!(config.health_region, "us-east-1");
        assert_eq!(config.fanout_page_size, 50);
        assert_eq!(config.event_source, "heidi.health");
        assert_eq!(config.detail_type, "awshealthtest");
        assert_eq!(config.fetch_error_policy, FetchErrorPolicy::Finish);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_backfill_config_builder() {
        let config = BackfillConfig::new("123456789012", "eu-west-1")
            .with_checkpoint_dir("/state")
            .with_max_pages(3)
            .with_fetch_error_policy(FetchErrorPolicy::Abort)
            .with_dry_run(true);

        assert_eq!(config.checkpoint_dir, PathBuf::from("/state"));
        assert_eq!(config.max_pages, Some(3));
        assert_eq!(config.fetch_error_policy, FetchErrorPolicy::Abort);
        assert!(config.dry_run);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = BackfillConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_millis(100));
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(3), Duration::from_millis(800));

        let config = config.with_retry_backoff_ms(0);
        assert_eq!(config.retry_delay(5), Duration::ZERO);
        assert_eq!(
            BackfillConfig::default().with_retry_backoff_ms(u64::MAX).retry_delay(40),
            Duration::from_millis(u64::MAX)
        );
    }

    #[test]
    fn test_event_bus_arn_derivation() {
        let config = BackfillConfig::new("123456789012", "eu-west-1");
        assert_eq!(
            config.event_bus_arn(),
            "arn:aws:events:eu-west-1:123456789012:event-bus/heidi-DataCollectionBus-123456789012"
        );

        let config = config.with_resource_prefix("acme-");
        assert!(config.event_bus_arn().ends_with("acme-DataCollectionBus-123456789012"));

        let config = config.with_event_bus_arn("arn:aws:events:us-east-1:1:event-bus/custom");
        assert_eq!(config.event_bus_arn(), "arn:aws:events:us-east-1:1:event-bus/custom");
    }

    #[test]
    fn test_checkpoint_path() {
        let config = BackfillConfig::new("123456789012", "eu-west-1").with_checkpoint_dir("/state");
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("/state/checkpoint_healthevents_123456789012.json")
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(BackfillConfig::default().validate().is_err());
        assert!(BackfillConfig::new("123456789012", "").validate().is_err());
        assert!(BackfillConfig::new("123456789012", "eu-west-1").validate().is_ok());

        let config = BackfillConfig::new("1", "").with_event_bus_arn("arn:custom");
        assert!(config.validate().is_ok());

        let config = BackfillConfig::new("1", "eu-west-1").with_fanout_page_size(0);
        assert!(config.validate().is_err());
        let config = BackfillConfig::new("1", "eu-west-1").with_event_page_size(500);
        assert!(config.validate().is_err());
        let config = BackfillConfig::new("1", "eu-west-1").with_max_pages(0);
        assert!(config.validate().is_err());
        let config = BackfillConfig::new("1", "eu-west-1")
            .with_fetch_error_policy(FetchErrorPolicy::Retry { attempts: 0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fetch_error_policy_parse() {
        assert_eq!("finish".parse::<FetchErrorPolicy>().unwrap(), FetchErrorPolicy::Finish);
        assert_eq!("ABORT".parse::<FetchErrorPolicy>().unwrap(), FetchErrorPolicy::Abort);
        assert_eq!(
            "retry".parse::<FetchErrorPolicy>().unwrap(),
            FetchErrorPolicy::Retry { attempts: 3 }
        );
        assert_eq!(
            "retry:5".parse::<FetchErrorPolicy>().unwrap(),
            FetchErrorPolicy::Retry { attempts: 5 }
        );
        assert!("retry:x".parse::<FetchErrorPolicy>().is_err());
        assert!("ignore".parse::<FetchErrorPolicy>().is_err());
        assert_eq!(FetchErrorPolicy::Retry { attempts: 2 }.to_string(), "retry:2");
    }

    #[test]
    fn test_from_toml() {
        let config = BackfillConfig::from_toml_str(
            r#"
            account_id = "123456789012"
            region = "eu-west-1"
            checkpoint_dir = "/var/lib/backfill"
            max_pages = 10

            [fetch_error_policy]
            mode = "retry"
            attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.account_id, "123456789012");
        assert_eq!(config.fanout_page_size, 50);
        assert_eq!(config.max_pages, Some(10));
        assert_eq!(config.fetch_error_policy, FetchErrorPolicy::Retry { attempts: 2 });
        assert!(config.validate().is_ok());

        assert!(BackfillConfig::from_toml_str("max_pages = \"many\"").is_err());
    }
}
