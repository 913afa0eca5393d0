use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::chain::{ChainIssue, ChainLink, IssueKind, LinkStatus};
use super::trust_anchor::AnchorSet;
use crate::config::ValidatorConfig;

/// Aggregate trust verdict for a whole chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainVerdict {
    /// Every link validated
    Secure,
    /// An unsigned delegation was proven; not an error
    Insecure,
    /// Records were present but failed validation
    Bogus,
    /// No definitive statement could be made
    Indeterminate,
}

impl std::fmt::Display for ChainVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainVerdict::Secure => write!(f, "secure"),
            ChainVerdict::Insecure => write!(f, "insecure"),
            ChainVerdict::Bogus => write!(f, "bogus"),
            ChainVerdict::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub verdict: ChainVerdict,
    /// Root-to-target order
    pub issues: Vec<ChainIssue>,
    pub key_expires_soon: bool,
    /// Earliest anchor or signature expiry seen on the chain
    pub nearest_expiry: Option<DateTime<Utc>>,
}

/// Folds chain links into a verdict
#[derive(Debug, Clone)]
pub struct ChainEvaluator {
    anchor_horizon: Duration,
    signature_horizon: Duration,
}

impl ChainEvaluator {
    pub fn new(anchor_horizon: Duration, signature_horizon: Duration) -> Self {
        Self {
            anchor_horizon,
            signature_horizon,
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self::new(config.expiry_horizon, config.signature_expiry_horizon)
    }

    pub fn evaluate(
        &self,
        links: &[ChainLink],
        anchors: &AnchorSet,
        now: DateTime<Utc>,
    ) -> ChainReport {
        let verdict = Self::verdict(links);
        let issues: Vec<ChainIssue> = links.iter().flat_map(|l| l.issues.clone()).collect();

        let signature_expiry = links
            .iter()
            .filter(|l| l.status == LinkStatus::Secure)
            .filter_map(|l| l.signature_expiry)
            .min()
            .and_then(|secs| Utc.timestamp_opt(i64::from(secs), 0).single());

        let anchor_soon = anchors.expires_within(self.anchor_horizon, now);
        let signature_soon = signature_expiry.is_some_and(|expiry| {
            chrono::Duration::from_std(self.signature_horizon)
                .is_ok_and(|horizon| expiry <= now + horizon)
        });

        let nearest_expiry = match (anchors.nearest_expiry, signature_expiry) {
            (Some(a), Some(s)) => Some(a.min(s)),
            (a, s) => a.or(s),
        };

        debug!(
            "Chain of {} links is {} ({} issues)",
            links.len(),
            verdict,
            issues.len()
        );

        ChainReport {
            verdict,
            issues,
            key_expires_soon: anchor_soon || signature_soon,
            nearest_expiry,
        }
    }

    /// Bogus wins over Indeterminate, which wins over Insecure
    fn verdict(links: &[ChainLink]) -> ChainVerdict {
        if links.is_empty() {
            return ChainVerdict::Indeterminate;
        }
        let any = |status: LinkStatus| links.iter().any(|l| l.status == status);
        if any(LinkStatus::Bogus) {
            ChainVerdict::Bogus
        } else if any(LinkStatus::Indeterminate) {
            ChainVerdict::Indeterminate
        } else if any(LinkStatus::Insecure) {
            ChainVerdict::Insecure
        } else {
            ChainVerdict::Secure
        }
    }

    /// Report for a chain that could not be started
    pub fn unavailable(zone: &str, kind: IssueKind, message: impl Into<String>) -> ChainReport {
        ChainReport {
            verdict: ChainVerdict::Indeterminate,
            issues: vec![ChainIssue::new(zone, kind, message)],
            key_expires_soon: false,
            nearest_expiry: None,
        }
    }
}
