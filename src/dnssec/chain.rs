//! Walks the delegation path from the root to a domain, authenticating the
//! DNSKEY set of every zone cut against the DS set handed down by its parent.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::denial::{DenialOfExistenceValidator, DsAbsence};
use super::digest::ds_matches;
use super::errors::DnsSecError;
use super::records::{DnsKeyRecord, DsRecord, RrsigRecord};
use super::signature::SignatureVerifier;
use super::trust_anchor::AnchorSet;
use crate::dns::client::{DnsQuery, DnsResponse};
use crate::dns::common::{label_count, name_labels, normalize_name};
use crate::dns::enums::DNSResourceType;
use crate::dns::resource::DNSResource;
use crate::error::{AnalysisError, DnsError};

/// Outcome of one zone cut
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Secure,
    Insecure,
    Bogus,
    Indeterminate,
}

/// Category of a problem found at a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    TrustAnchor,
    Transport,
    MissingRecords,
    DsMismatch,
    SignatureInvalid,
    SignatureExpired,
    SignatureNotYetValid,
    UnsupportedAlgorithm,
    UnprovenDenial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainIssue {
    pub zone: String,
    pub kind: IssueKind,
    pub message: String,
}

impl ChainIssue {
    pub fn new(zone: &str, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            zone: zone.to_string(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.zone, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub zone: String,
    /// DS set from the parent, or the trust anchors at the root
    pub parent_ds: Vec<DsRecord>,
    pub dnskeys: Vec<DnsKeyRecord>,
    /// Key that matched a trusted digest and signed the DNSKEY set
    pub matched_key: Option<DnsKeyRecord>,
    pub signature_verified: bool,
    pub status: LinkStatus,
    pub issues: Vec<ChainIssue>,
    /// Earliest expiration among the RRSIGs that authenticated this link
    pub signature_expiry: Option<u32>,
}

impl ChainLink {
    fn new(zone: &str, parent_ds: Vec<DsRecord>) -> Self {
        Self {
            zone: zone.to_string(),
            parent_ds,
            dnskeys: Vec::new(),
            matched_key: None,
            signature_verified: false,
            status: LinkStatus::Indeterminate,
            issues: Vec::new(),
            signature_expiry: None,
        }
    }

    fn fail(mut self, status: LinkStatus, kind: IssueKind, message: impl Into<String>) -> Self {
        self.status = status;
        self.issues.push(ChainIssue::new(&self.zone, kind, message));
        self
    }

    fn note_expiry(&mut self, expiration: u32) {
        self.signature_expiry = Some(
            self.signature_expiry
                .map_or(expiration, |current| current.min(expiration)),
        );
    }
}

/// Builds the chain of links for one domain. The walk is sequential: each
/// zone cut needs the authenticated keys of the one above it.
pub struct ChainBuilder<'a> {
    dns: &'a dyn DnsQuery,
    verifier: SignatureVerifier,
    denial: DenialOfExistenceValidator,
}

type Walk<T> = Result<T, AnalysisError>;

impl<'a> ChainBuilder<'a> {
    pub fn new(dns: &'a dyn DnsQuery) -> Self {
        Self {
            dns,
            verifier: SignatureVerifier::new(),
            denial: DenialOfExistenceValidator::new(),
        }
    }

    /// Check signature windows against a fixed time instead of the clock
    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub async fn build(
        &self,
        domain: &str,
        anchors: &AnchorSet,
        cancel: &CancellationToken,
    ) -> Walk<Vec<ChainLink>> {
        let domain = normalize_name(domain);
        let mut links = Vec::new();

        let root_ds = anchors.ds_records(".");
        if root_ds.is_empty() {
            links.push(ChainLink::new(".", Vec::new()).fail(
                LinkStatus::Indeterminate,
                IssueKind::TrustAnchor,
                "no usable root trust anchor",
            ));
            return Ok(links);
        }

        let mut zone = ".".to_string();
        let mut trusted_ds = root_ds;
        let mut ds_expiry = None;

        loop {
            let (link, keys) = self
                .authenticate_zone(&zone, trusted_ds, ds_expiry, cancel)
                .await?;
            let status = link.status;
            links.push(link);
            if status != LinkStatus::Secure || zone == domain {
                return Ok(links);
            }

            match self.find_next_cut(&zone, &domain, &keys, cancel).await? {
                NextCut::Delegation {
                    child,
                    ds,
                    expiration,
                } => {
                    zone = child;
                    trusted_ds = ds;
                    ds_expiry = Some(expiration);
                }
                NextCut::Terminal(Some(link)) => {
                    links.push(link);
                    return Ok(links);
                }
                NextCut::Terminal(None) => return Ok(links),
            }
        }
    }

    async fn query(
        &self,
        name: &str,
        rtype: DNSResourceType,
        cancel: &CancellationToken,
    ) -> Walk<Result<DnsResponse, DnsError>> {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        trace!("Querying {} {}", name, rtype);
        match self.dns.query(name, rtype, cancel).await {
            Err(DnsError::Cancelled) => Err(AnalysisError::Cancelled),
            other => Ok(other),
        }
    }

    /// Fetch the zone's DNSKEY set and authenticate it against `trusted_ds`.
    /// Returns the link and, when secure, the zone's usable keys.
    async fn authenticate_zone(
        &self,
        zone: &str,
        trusted_ds: Vec<DsRecord>,
        ds_expiry: Option<u32>,
        cancel: &CancellationToken,
    ) -> Walk<(ChainLink, Vec<DnsKeyRecord>)> {
        debug!("Authenticating DNSKEY set of {}", zone);
        let mut link = ChainLink::new(zone, trusted_ds);
        if let Some(expiration) = ds_expiry {
            link.note_expiry(expiration);
        }

        let response = match self.query(zone, DNSResourceType::DNSKEY, cancel).await? {
            Ok(response) => response,
            Err(e) => {
                warn!("DNSKEY lookup for {} failed: {}", zone, e);
                let message = format!("DNSKEY lookup failed: {}", e);
                return Ok((
                    link.fail(LinkStatus::Indeterminate, IssueKind::Transport, message),
                    Vec::new(),
                ));
            }
        };

        let key_rrset: Vec<DNSResource> = response
            .answers_of(zone, DNSResourceType::DNSKEY)
            .into_iter()
            .cloned()
            .collect();
        link.dnskeys = key_rrset
            .iter()
            .filter_map(|rr| DnsKeyRecord::from_rdata(&rr.rdata).ok())
            .collect();

        if link.dnskeys.is_empty() {
            let message = DnsSecError::NoDnsKey(zone.to_string()).to_string();
            return Ok((
                link.fail(LinkStatus::Bogus, IssueKind::MissingRecords, message),
                Vec::new(),
            ));
        }

        let rrsigs = covering_rrsigs(&response.answers, zone, DNSResourceType::DNSKEY);
        if rrsigs.is_empty() {
            let message = DnsSecError::NoRrsig("DNSKEY".to_string()).to_string();
            return Ok((
                link.fail(LinkStatus::Bogus, IssueKind::MissingRecords, message),
                Vec::new(),
            ));
        }

        let supported: Vec<&DsRecord> = link
            .parent_ds
            .iter()
            .filter(|ds| ds.algorithm.is_supported() && ds.digest_type.is_supported())
            .collect();
        if supported.is_empty() {
            let described: Vec<String> = link
                .parent_ds
                .iter()
                .map(|ds| format!("{}/{}", ds.algorithm, ds.digest_type))
                .collect();
            let message = format!(
                "no DS record uses a supported algorithm and digest ({})",
                described.join(", ")
            );
            return Ok((
                link.fail(
                    LinkStatus::Indeterminate,
                    IssueKind::UnsupportedAlgorithm,
                    message,
                ),
                Vec::new(),
            ));
        }

        let matched: Vec<DnsKeyRecord> = link
            .dnskeys
            .iter()
            .filter(|key| key.is_usable())
            .filter(|key| {
                supported
                    .iter()
                    .any(|ds| ds_matches(zone, ds, key).unwrap_or(false))
            })
            .cloned()
            .collect();

        if matched.is_empty() {
            let tags: Vec<String> = supported.iter().map(|ds| ds.key_tag.to_string()).collect();
            let message = format!(
                "DS digest does not match any DNSKEY (DS key tag {})",
                tags.join(", ")
            );
            return Ok((
                link.fail(LinkStatus::Bogus, IssueKind::DsMismatch, message),
                Vec::new(),
            ));
        }

        match self.verify_rrset(&key_rrset, &rrsigs, &matched, zone) {
            Ok((expiration, signer)) => {
                debug!("DNSKEY set of {} signed by key {}", zone, signer.key_tag());
                link.note_expiry(expiration);
                link.matched_key = Some(signer);
                link.signature_verified = true;
                link.status = LinkStatus::Secure;
                let keys = link
                    .dnskeys
                    .iter()
                    .filter(|k| k.is_usable())
                    .cloned()
                    .collect();
                Ok((link, keys))
            }
            Err(e) => {
                let message = format!("DNSKEY RRSIG rejected: {}", e);
                Ok((
                    link.fail(LinkStatus::Bogus, signature_issue_kind(&e), message),
                    Vec::new(),
                ))
            }
        }
    }

    /// Look for the next zone cut below `zone` on the way to `domain`.
    async fn find_next_cut(
        &self,
        zone: &str,
        domain: &str,
        zone_keys: &[DnsKeyRecord],
        cancel: &CancellationToken,
    ) -> Walk<NextCut> {
        let zone_depth = name_labels(zone).len();
        let domain_labels = name_labels(domain);

        for depth in zone_depth + 1..=domain_labels.len() {
            let candidate = domain_labels[domain_labels.len() - depth..].join(".");
            debug!("Looking for DS of {} in {}", candidate, zone);

            let response = match self.query(&candidate, DNSResourceType::DS, cancel).await? {
                Ok(response) => response,
                Err(e) => {
                    warn!("DS lookup for {} failed: {}", candidate, e);
                    let link = ChainLink::new(&candidate, Vec::new()).fail(
                        LinkStatus::Indeterminate,
                        IssueKind::Transport,
                        format!("DS lookup failed: {}", e),
                    );
                    return Ok(NextCut::Terminal(Some(link)));
                }
            };

            let ds_rrset: Vec<DNSResource> = response
                .answers_of(&candidate, DNSResourceType::DS)
                .into_iter()
                .cloned()
                .collect();

            if !ds_rrset.is_empty() {
                let rrsigs = covering_rrsigs(&response.answers, &candidate, DNSResourceType::DS);
                let ds: Vec<DsRecord> = ds_rrset
                    .iter()
                    .filter_map(|rr| DsRecord::from_rdata(&rr.rdata).ok())
                    .collect();

                return Ok(match self.verify_rrset(&ds_rrset, &rrsigs, zone_keys, zone) {
                    Ok((expiration, _)) => NextCut::Delegation {
                        child: candidate,
                        ds,
                        expiration,
                    },
                    Err(e) => {
                        let link = ChainLink::new(&candidate, ds).fail(
                            LinkStatus::Bogus,
                            signature_issue_kind(&e),
                            format!("DS RRSIG from {} rejected: {}", zone, e),
                        );
                        NextCut::Terminal(Some(link))
                    }
                });
            }

            match self.check_denial(&candidate, zone, &response, zone_keys) {
                Ok(DsAbsence::NotZoneCut) => {
                    debug!("{} is not a zone cut", candidate);
                    continue;
                }
                Ok(DsAbsence::InsecureDelegation) => {
                    debug!("{} is an unsigned delegation", candidate);
                    let mut link = ChainLink::new(&candidate, Vec::new());
                    link.status = LinkStatus::Insecure;
                    return Ok(NextCut::Terminal(Some(link)));
                }
                Ok(DsAbsence::Unproven) => {
                    let link = ChainLink::new(&candidate, Vec::new()).fail(
                        LinkStatus::Indeterminate,
                        IssueKind::UnprovenDenial,
                        "absence of DS could not be proven",
                    );
                    return Ok(NextCut::Terminal(Some(link)));
                }
                Err(DenialFailure::Bogus(e)) => {
                    let link = ChainLink::new(&candidate, Vec::new()).fail(
                        LinkStatus::Bogus,
                        signature_issue_kind(&e),
                        format!("denial of DS from {} rejected: {}", zone, e),
                    );
                    return Ok(NextCut::Terminal(Some(link)));
                }
                Err(DenialFailure::Unusable(e)) => {
                    let link = ChainLink::new(&candidate, Vec::new()).fail(
                        LinkStatus::Indeterminate,
                        IssueKind::UnprovenDenial,
                        format!("denial of DS unusable: {}", e),
                    );
                    return Ok(NextCut::Terminal(Some(link)));
                }
            }
        }

        // The domain lives inside `zone`, whose keys are authenticated
        Ok(NextCut::Terminal(None))
    }

    /// Verify the NSEC/NSEC3 records of a negative DS answer with the
    /// parent's keys, then interpret them.
    fn check_denial(
        &self,
        name: &str,
        zone: &str,
        response: &DnsResponse,
        zone_keys: &[DnsKeyRecord],
    ) -> Result<DsAbsence, DenialFailure> {
        let mut rrsets: BTreeMap<(String, u16), Vec<DNSResource>> = BTreeMap::new();
        for rr in &response.authorities {
            if matches!(rr.rtype, DNSResourceType::NSEC | DNSResourceType::NSEC3) {
                rrsets
                    .entry((normalize_name(&rr.name()), rr.rtype.into()))
                    .or_default()
                    .push(rr.clone());
            }
        }

        let mut verified = Vec::new();
        for ((owner, _), rrset) in rrsets {
            let rtype = rrset[0].rtype;
            let rrsigs = covering_rrsigs(&response.authorities, &owner, rtype);
            // A wildcard-expanded denial record proves nothing about its owner
            let owner_labels = label_count(&owner);
            let (rrsigs, expanded): (Vec<RrsigRecord>, Vec<RrsigRecord>) = rrsigs
                .into_iter()
                .partition(|sig| sig.labels == owner_labels);
            if rrsigs.is_empty() && !expanded.is_empty() {
                return Err(DenialFailure::Bogus(DnsSecError::RrsigMismatch(format!(
                    "{} {} was synthesised from a wildcard",
                    owner, rtype
                ))));
            }
            self.verify_rrset(&rrset, &rrsigs, zone_keys, zone)
                .map_err(DenialFailure::Bogus)?;
            verified.extend(rrset);
        }

        self.denial
            .prove_ds_absence(name, &verified)
            .map_err(DenialFailure::Unusable)
    }

    /// Accept `rrset` if any RRSIG from `signer` verifies with any of `keys`.
    /// Returns the signature expiration and the key that verified it.
    fn verify_rrset(
        &self,
        rrset: &[DNSResource],
        rrsigs: &[RrsigRecord],
        keys: &[DnsKeyRecord],
        signer: &str,
    ) -> Result<(u32, DnsKeyRecord), DnsSecError> {
        let type_name = rrset
            .first()
            .map(|rr| rr.rtype.to_string())
            .unwrap_or_default();
        let mut last_error = DnsSecError::NoRrsig(type_name);

        for rrsig in rrsigs {
            if normalize_name(&rrsig.signer_name) != signer {
                last_error = DnsSecError::RrsigMismatch(format!(
                    "signer {} is not {}",
                    rrsig.signer_name, signer
                ));
                continue;
            }
            for key in keys.iter().filter(|k| k.key_tag() == rrsig.key_tag) {
                match self.verifier.check(rrsig, rrset, key) {
                    Ok(()) => return Ok((rrsig.expiration, key.clone())),
                    Err(e) => {
                        trace!("RRSIG by key {} rejected: {}", key.key_tag(), e);
                        last_error = e;
                    }
                }
            }
        }

        if matches!(last_error, DnsSecError::NoRrsig(_)) && !rrsigs.is_empty() {
            last_error = DnsSecError::RrsigMismatch(
                "no RRSIG was made by a trusted key".to_string(),
            );
        }
        Err(last_error)
    }
}

enum NextCut {
    Delegation {
        child: String,
        ds: Vec<DsRecord>,
        expiration: u32,
    },
    /// The walk ends, optionally with a final link for the failing name
    Terminal(Option<ChainLink>),
}

enum DenialFailure {
    Bogus(DnsSecError),
    Unusable(DnsSecError),
}

/// RRSIGs in `records` owned by `owner` that cover `rtype`
fn covering_rrsigs(records: &[DNSResource], owner: &str, rtype: DNSResourceType) -> Vec<RrsigRecord> {
    records
        .iter()
        .filter(|rr| rr.rtype == DNSResourceType::RRSIG && rr.name().eq_ignore_ascii_case(owner))
        .filter_map(|rr| RrsigRecord::from_rdata(&rr.rdata).ok())
        .filter(|sig| sig.type_covered == rtype)
        .collect()
}

fn signature_issue_kind(error: &DnsSecError) -> IssueKind {
    match error {
        DnsSecError::SignatureExpired => IssueKind::SignatureExpired,
        DnsSecError::SignatureNotYetValid => IssueKind::SignatureNotYetValid,
        DnsSecError::UnsupportedAlgorithm(_) => IssueKind::UnsupportedAlgorithm,
        DnsSecError::NoRrsig(_) | DnsSecError::NoDnsKey(_) => IssueKind::MissingRecords,
        _ => IssueKind::SignatureInvalid,
    }
}
