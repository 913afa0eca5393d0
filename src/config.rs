use crate::error::ConfigError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// IANA publication point for the root zone trust anchors
pub const DEFAULT_ANCHOR_URL: &str = "https://data.iana.org/root-anchors/root-anchors.xml";

const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Recursive resolvers used for DNSKEY / DS lookups
    pub resolvers: Vec<SocketAddr>,

    /// Timeout for a single DNS exchange
    pub query_timeout: Duration,

    /// Maximum number of retries for a DNS query
    pub max_retries: u8,

    /// Where the root trust anchor document is published
    pub anchor_url: String,

    /// On-disk copy of the last fetched trust anchor document
    pub anchor_cache_path: PathBuf,

    /// How long a cached trust anchor document is used without re-fetching
    pub anchor_freshness: Duration,

    /// Timeout for downloading the trust anchor document
    pub anchor_fetch_timeout: Duration,

    /// Anchors expiring within this window are reported as expiring soon
    pub expiry_horizon: Duration,

    /// RRSIGs expiring within this window are reported as expiring soon
    pub signature_expiry_horizon: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            resolvers: vec![
                "1.1.1.1:53".parse().expect("Cloudflare DNS is valid"),
                "8.8.8.8:53".parse().expect("Google DNS is valid"),
            ],
            query_timeout: Duration::from_secs(5),
            max_retries: 2,
            anchor_url: DEFAULT_ANCHOR_URL.to_string(),
            anchor_cache_path: default_anchor_cache_path(),
            anchor_freshness: Duration::from_secs(DAY),
            anchor_fetch_timeout: Duration::from_secs(30),
            expiry_horizon: Duration::from_secs(30 * DAY),
            signature_expiry_horizon: Duration::from_secs(3 * DAY),
        }
    }
}

/// Keys accepted in a TOML configuration file. Durations are in seconds,
/// horizons in days.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    resolvers: Option<Vec<String>>,
    query_timeout: Option<u64>,
    max_retries: Option<u8>,
    anchor_url: Option<String>,
    anchor_cache_path: Option<PathBuf>,
    anchor_freshness: Option<u64>,
    anchor_fetch_timeout: Option<u64>,
    expiry_horizon: Option<u64>,
    signature_expiry_horizon: Option<u64>,
}

pub fn default_anchor_cache_path() -> PathBuf {
    std::env::temp_dir()
        .join("dnssec-chain")
        .join("root-anchors.xml")
}

impl ValidatorConfig {
    /// Defaults overridden by `DNSSEC_CHAIN_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the TOML file, then environment variables
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut config = Self::default();

        if let Some(resolvers) = file.resolvers {
            config.resolvers = parse_resolvers(&resolvers.join(","))?;
        }
        if let Some(secs) = file.query_timeout {
            config.query_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = file.max_retries {
            config.max_retries = retries;
        }
        if let Some(url) = file.anchor_url {
            config.anchor_url = url;
        }
        if let Some(path) = file.anchor_cache_path {
            config.anchor_cache_path = path;
        }
        if let Some(secs) = file.anchor_freshness {
            config.anchor_freshness = Duration::from_secs(secs);
        }
        if let Some(secs) = file.anchor_fetch_timeout {
            config.anchor_fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(days) = file.expiry_horizon {
            config.expiry_horizon = Duration::from_secs(days * DAY);
        }
        if let Some(days) = file.signature_expiry_horizon {
            config.signature_expiry_horizon = Duration::from_secs(days * DAY);
        }

        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(resolvers) = std::env::var("DNSSEC_CHAIN_RESOLVERS") {
            self.resolvers = parse_resolvers(&resolvers)?;
        }

        if let Ok(timeout) = std::env::var("DNSSEC_CHAIN_QUERY_TIMEOUT") {
            let secs = timeout
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(timeout.clone()))?;
            self.query_timeout = Duration::from_secs(secs);
        }

        if let Ok(retries) = std::env::var("DNSSEC_CHAIN_MAX_RETRIES") {
            self.max_retries = retries
                .parse::<u8>()
                .map_err(|_| ConfigError::ParseError(format!("Invalid max retries: {}", retries)))?;
        }

        if let Ok(url) = std::env::var("DNSSEC_CHAIN_ANCHOR_URL") {
            self.anchor_url = url;
        }

        if let Ok(path) = std::env::var("DNSSEC_CHAIN_ANCHOR_CACHE") {
            if !path.is_empty() {
                self.anchor_cache_path = PathBuf::from(path);
            }
        }

        if let Ok(freshness) = std::env::var("DNSSEC_CHAIN_ANCHOR_FRESHNESS") {
            self.anchor_freshness = Duration::from_secs(parse_u64(&freshness)?);
        }

        if let Ok(timeout) = std::env::var("DNSSEC_CHAIN_ANCHOR_TIMEOUT") {
            let secs = timeout
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(timeout.clone()))?;
            self.anchor_fetch_timeout = Duration::from_secs(secs);
        }

        if let Ok(days) = std::env::var("DNSSEC_CHAIN_EXPIRY_HORIZON") {
            self.expiry_horizon = Duration::from_secs(parse_u64(&days)? * DAY);
        }

        if let Ok(days) = std::env::var("DNSSEC_CHAIN_SIGNATURE_HORIZON") {
            self.signature_expiry_horizon = Duration::from_secs(parse_u64(&days)? * DAY);
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolvers.is_empty() {
            return Err(ConfigError::InvalidResolver(
                "At least one resolver is required".to_string(),
            ));
        }

        if self.query_timeout.is_zero() || self.query_timeout.as_secs() > 300 {
            return Err(ConfigError::InvalidTimeout(
                "Query timeout must be between 1 and 300 seconds".to_string(),
            ));
        }

        if self.anchor_fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "Trust anchor fetch timeout must be greater than 0".to_string(),
            ));
        }

        if !(self.anchor_url.starts_with("https://") || self.anchor_url.starts_with("http://")) {
            return Err(ConfigError::InvalidAnchorUrl(self.anchor_url.clone()));
        }

        if self.anchor_freshness.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "Trust anchor freshness window must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn parse_resolvers(list: &str) -> Result<Vec<SocketAddr>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>()
                .or_else(|_| s.parse::<std::net::IpAddr>().map(|ip| SocketAddr::new(ip, 53)))
                .map_err(|_| ConfigError::InvalidResolver(s.to_string()))
        })
        .collect()
}

fn parse_u64(s: &str) -> Result<u64, ConfigError> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidDuration(s.to_string()))
}
