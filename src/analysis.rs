//! Entry point used by front ends: one call per domain, fresh state each time.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, info, warn};

use crate::config::ValidatorConfig;
use crate::dns::client::{DnsQuery, UdpDnsClient};
use crate::dns::common::{name_labels, normalize_name};
use crate::dnssec::{
    ChainBuilder, ChainEvaluator, ChainIssue, ChainLink, ChainReport, ChainVerdict, IssueKind,
    LinkStatus, SignatureVerifier, TrustAnchorStore,
};
use crate::error::{AnalysisError, AnchorError};

/// Per-link view published with the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSummary {
    pub zone: String,
    pub status: LinkStatus,
    pub ds_count: usize,
    pub dnskey_count: usize,
    pub matched_key_tag: Option<u16>,
    pub signature_verified: bool,
    pub signature_expiry: Option<DateTime<Utc>>,
}

impl From<&ChainLink> for LinkSummary {
    fn from(link: &ChainLink) -> Self {
        Self {
            zone: link.zone.clone(),
            status: link.status,
            ds_count: link.parent_ds.len(),
            dnskey_count: link.dnskeys.len(),
            matched_key_tag: link.matched_key.as_ref().map(|k| k.key_tag()),
            signature_verified: link.signature_verified,
            signature_expiry: link
                .signature_expiry
                .and_then(|secs| Utc.timestamp_opt(i64::from(secs), 0).single()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub domain: String,
    pub verdict: ChainVerdict,
    /// True only for a `Secure` verdict
    pub chain_valid: bool,
    pub key_expires_soon: bool,
    pub nearest_expiry: Option<DateTime<Utc>>,
    pub issues: Vec<ChainIssue>,
    pub links: Vec<LinkSummary>,
}

impl AnalysisResult {
    fn new(domain: String, report: ChainReport, links: &[ChainLink]) -> Self {
        Self {
            domain,
            chain_valid: report.verdict == ChainVerdict::Secure,
            verdict: report.verdict,
            key_expires_soon: report.key_expires_soon,
            nearest_expiry: report.nearest_expiry,
            issues: report.issues,
            links: links.iter().map(LinkSummary::from).collect(),
        }
    }
}

pub struct DnssecAnalysis {
    dns: Arc<dyn DnsQuery>,
    anchors: Arc<TrustAnchorStore>,
    evaluator: ChainEvaluator,
    verifier: Option<SignatureVerifier>,
}

impl DnssecAnalysis {
    pub fn new(
        dns: Arc<dyn DnsQuery>,
        anchors: Arc<TrustAnchorStore>,
        config: &ValidatorConfig,
    ) -> Self {
        Self {
            dns,
            anchors,
            evaluator: ChainEvaluator::from_config(config),
            verifier: None,
        }
    }

    /// Resolvers and trust anchor source taken from `config`
    pub fn from_config(config: &ValidatorConfig) -> Result<Self, AnchorError> {
        let store = TrustAnchorStore::from_config(config)?;
        Ok(Self::new(
            Arc::new(UdpDnsClient::new(config)),
            Arc::new(store),
            config,
        ))
    }

    /// Evaluate signatures at a fixed time instead of the wall clock
    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Validate the chain of trust for `domain`. Ordinary DNSSEC failures come
    /// back as a verdict; only cancellation and invalid input are errors.
    pub async fn analyze(
        &self,
        domain: &str,
        span: Span,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let domain = validate_domain(domain)?;
        self.run(domain, cancel).instrument(span).await
    }

    async fn run(
        &self,
        domain: String,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        info!("Validating DNSSEC chain for {}", domain);

        let anchors = match self.anchors.get_anchors(cancel).await {
            Ok(anchors) => anchors,
            Err(AnchorError::Cancelled) => return Err(AnalysisError::Cancelled),
            Err(e) => {
                warn!("Trust anchors unavailable: {}", e);
                let report = ChainEvaluator::unavailable(
                    ".",
                    IssueKind::TrustAnchor,
                    format!("trust anchors unavailable: {}", e),
                );
                return Ok(AnalysisResult::new(domain, report, &[]));
            }
        };

        let verifier = self.verifier.unwrap_or_default();
        let links = ChainBuilder::new(self.dns.as_ref())
            .with_verifier(verifier)
            .build(&domain, &anchors, cancel)
            .await?;

        let now = Utc
            .timestamp_opt(i64::from(verifier.now()), 0)
            .single()
            .unwrap_or_else(Utc::now);
        let report = self.evaluator.evaluate(&links, &anchors, now);

        info!(
            "DNSSEC chain for {} is {} ({} links, {} issues)",
            domain,
            report.verdict,
            links.len(),
            report.issues.len()
        );
        Ok(AnalysisResult::new(domain, report, &links))
    }
}

/// Normalise a domain name, rejecting input no lookup could succeed for
pub fn validate_domain(domain: &str) -> Result<String, AnalysisError> {
    let trimmed = domain.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::InvalidDomain("empty name".to_string()));
    }

    let name = normalize_name(trimmed);
    if name.len() > 253 {
        return Err(AnalysisError::InvalidDomain(format!(
            "{} is longer than 253 characters",
            name
        )));
    }
    if name != "." && trimmed.trim_end_matches('.').split('.').any(str::is_empty) {
        return Err(AnalysisError::InvalidDomain(format!("{} has an empty label", trimmed)));
    }
    for label in name_labels(&name) {
        if label.len() > 63 {
            return Err(AnalysisError::InvalidDomain(format!(
                "label {} is longer than 63 characters",
                label
            )));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'*')
        {
            return Err(AnalysisError::InvalidDomain(format!(
                "label {} has invalid characters",
                label
            )));
        }
    }

    Ok(name)
}
