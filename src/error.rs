use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DnsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Query for {name} timed out")]
    Timeout { name: String },

    #[error("Server failure answering {name}")]
    ServerFailure { name: String },

    #[error("No resolvers configured")]
    NoResolvers,

    #[error("Query cancelled")]
    Cancelled,
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        DnsError::Io(err.to_string())
    }
}

impl From<crate::dns::ParseError> for DnsError {
    fn from(err: crate::dns::ParseError) -> Self {
        DnsError::Parse(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid resolver address: {0}")]
    InvalidResolver(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid trust anchor URL: {0}")]
    InvalidAnchorUrl(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnchorError {
    #[error("Trust anchor fetch failed: {0}")]
    Fetch(String),

    #[error("Trust anchor server returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Trust anchor fetch timed out")]
    Timeout,

    #[error("Trust anchor cache error: {0}")]
    Cache(String),

    #[error("Trust anchor retrieval cancelled")]
    Cancelled,
}

impl AnchorError {
    /// Network-level failures worth retrying; bad content and HTTP errors are not
    pub fn is_transient(&self) -> bool {
        matches!(self, AnchorError::Fetch(_) | AnchorError::Timeout)
    }
}

/// Errors surfaced by the analysis entry point. Ordinary DNSSEC failures are
/// reported as a verdict, never as one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
}

pub type Result<T> = std::result::Result<T, DnsError>;
