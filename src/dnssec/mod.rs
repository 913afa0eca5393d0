pub mod algorithm;
pub mod chain;
pub mod denial;
pub mod digest;
pub mod errors;
pub mod evaluator;
pub mod key_tag;
pub mod records;
pub mod signature;
pub mod trust_anchor;

pub use algorithm::DnsSecAlgorithm;
pub use chain::{ChainBuilder, ChainIssue, ChainLink, IssueKind, LinkStatus};
pub use denial::{DenialOfExistenceValidator, DsAbsence};
pub use digest::{DigestType, HashAlgorithm, compute_digest, ds_matches};
pub use errors::DnsSecError;
pub use evaluator::{ChainEvaluator, ChainReport, ChainVerdict};
pub use key_tag::calculate_key_tag;
pub use records::{DnsKeyRecord, DsRecord, Nsec3Record, NsecRecord, RrsigRecord};
pub use signature::{SignatureVerifier, der_to_fixed, fixed_to_der};
pub use trust_anchor::{
    AnchorCache, AnchorFetcher, AnchorSet, FileAnchorCache, HttpAnchorFetcher, TrustAnchor,
    TrustAnchorStore, parse_anchor_document,
};

/// DNSSEC constants
pub mod constants {
    /// DNS UDP payload size for DNSSEC (RFC 4035)
    pub const DNSSEC_UDP_SIZE: u16 = 4096;

    /// Maximum iterations for NSEC3 (RFC 5155)
    pub const MAX_NSEC3_ITERATIONS: u16 = 2500;

    /// Root KSK-2017
    pub const ROOT_KSK_KEY_TAG: u16 = 20326;
}
