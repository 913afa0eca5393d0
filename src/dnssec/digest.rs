use ring::digest;
use std::fmt;

use super::errors::{DnsSecError, Result};
use super::records::{DnsKeyRecord, DsRecord};
use crate::dns::common::name_to_wire;

/// Hash functions available for DNSKEY digests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    fn ring_algorithm(self) -> &'static digest::Algorithm {
        match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
            Self::Sha384 => &digest::SHA384,
            Self::Sha512 => &digest::SHA512,
        }
    }

    pub fn output_len(self) -> usize {
        self.ring_algorithm().output_len()
    }

    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        digest::digest(self.ring_algorithm(), data).as_ref().to_vec()
    }
}

/// DS digest type codes (RFC 4034, 4509, 5933, 6605)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestType {
    /// SHA-1 (RFC 3658)
    Sha1,
    /// SHA-256 (RFC 4509)
    Sha256,
    /// GOST R 34.11-94 (RFC 5933)
    Gost94,
    /// SHA-384 (RFC 6605)
    Sha384,
    /// Anything else
    Unassigned(u8),
}

impl DigestType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Sha1,
            2 => Self::Sha256,
            3 => Self::Gost94,
            4 => Self::Sha384,
            other => Self::Unassigned(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Sha1 => 1,
            Self::Sha256 => 2,
            Self::Gost94 => 3,
            Self::Sha384 => 4,
            Self::Unassigned(other) => other,
        }
    }

    /// Hash function behind this digest type, if we can compute it
    pub fn hash_algorithm(self) -> Option<HashAlgorithm> {
        match self {
            Self::Sha1 => Some(HashAlgorithm::Sha1),
            Self::Sha256 => Some(HashAlgorithm::Sha256),
            Self::Sha384 => Some(HashAlgorithm::Sha384),
            _ => None,
        }
    }

    pub fn is_supported(self) -> bool {
        self.hash_algorithm().is_some()
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA1"),
            Self::Sha256 => write!(f, "SHA256"),
            Self::Gost94 => write!(f, "GOST94"),
            Self::Sha384 => write!(f, "SHA384"),
            Self::Unassigned(n) => write!(f, "DIGEST{}", n),
        }
    }
}

/// Digest of a DNSKEY as used by DS records: hash over the canonical owner
/// name followed by the DNSKEY RDATA (RFC 4034 section 5.1.4).
pub fn compute_digest(owner: &str, key: &DnsKeyRecord, algorithm: HashAlgorithm) -> Vec<u8> {
    let mut data = name_to_wire(owner);
    data.extend_from_slice(&key.to_rdata());
    algorithm.hash(&data)
}

/// Whether `ds` authenticates `key` at `owner`. Errors when the DS digest
/// type cannot be computed, so callers can tell "no match" from "cannot tell".
pub fn ds_matches(owner: &str, ds: &DsRecord, key: &DnsKeyRecord) -> Result<bool> {
    let hash = ds
        .digest_type
        .hash_algorithm()
        .ok_or(DnsSecError::UnsupportedDigestType(ds.digest_type.to_u8()))?;

    if ds.key_tag != key.key_tag() || ds.algorithm != key.algorithm {
        return Ok(false);
    }
    if ds.digest.len() != hash.output_len() {
        return Ok(false);
    }

    // Public data, no need for a constant-time comparison
    Ok(compute_digest(owner, key, hash) == ds.digest)
}
