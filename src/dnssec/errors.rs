use thiserror::Error;

/// DNSSEC validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsSecError {
    #[error("No DNSKEY record found for zone {0}")]
    NoDnsKey(String),
    #[error("No RRSIG record covers the {0} RRset")]
    NoRrsig(String),
    #[error("DNSSEC signature has expired")]
    SignatureExpired,
    #[error("DNSSEC signature is not yet valid")]
    SignatureNotYetValid,
    #[error("Unsupported DNSSEC algorithm: {0}")]
    UnsupportedAlgorithm(u8),
    #[error("Unsupported digest type: {0}")]
    UnsupportedDigestType(u8),
    #[error("DNSSEC signature verification failed")]
    SignatureVerificationFailed,
    #[error("DS record digest does not match any DNSKEY")]
    DsDigestMismatch,
    #[error("Invalid DNSKEY public key format")]
    InvalidPublicKey,
    #[error("Invalid RRSIG signature format")]
    InvalidSignature,
    #[error("Malformed {0} record")]
    MalformedRecord(&'static str),
    #[error("RRSIG does not match the covered RRset: {0}")]
    RrsigMismatch(String),
    #[error("Too many NSEC3 iterations: {0}")]
    TooManyIterations(u16),
}

pub type Result<T> = std::result::Result<T, DnsSecError>;
