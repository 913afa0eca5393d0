use chrono::Utc;
use dnssec_chain::analysis::DnssecAnalysis;
use dnssec_chain::config::ValidatorConfig;
use dnssec_chain::dns::client::DnsResponse;
use dnssec_chain::dns::enums::{DNSResourceType, ResponseCode};
use dnssec_chain::dns::resource::DNSResource;
use dnssec_chain::dnssec::{ChainVerdict, DnsSecAlgorithm, IssueKind, LinkStatus};
use dnssec_chain::error::AnalysisError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Span;

mod common;
use common::{
    Hierarchy, ScriptedFetcher, Window, ZoneSigner, anchor_document, answer, memory_store,
};

fn analysis(hierarchy: &Hierarchy) -> DnssecAnalysis {
    DnssecAnalysis::new(
        hierarchy.dns.clone(),
        Arc::new(hierarchy.anchor_store()),
        &ValidatorConfig::default(),
    )
}

#[tokio::test]
async fn test_fully_valid_chain_is_secure() {
    let hierarchy = Hierarchy::secure();
    let result = analysis(&hierarchy)
        .analyze("Example.COM.", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Secure);
    assert!(result.chain_valid);
    assert!(result.issues.is_empty());
    assert!(!result.key_expires_soon);

    let zones: Vec<&str> = result.links.iter().map(|l| l.zone.as_str()).collect();
    assert_eq!(zones, vec![".", "com", "example.com"]);
    assert!(result.links.iter().all(|l| l.signature_verified));
    assert_eq!(
        result.links[2].matched_key_tag,
        Some(hierarchy.example.ksk.key_tag())
    );
}

#[tokio::test]
async fn test_ds_digest_mismatch_is_bogus() {
    let hierarchy = Hierarchy::unlinked();
    let dns = &hierarchy.dns;
    dns.publish_zone(&hierarchy.root);
    dns.publish_zone(&hierarchy.com);
    dns.publish_zone(&hierarchy.example);
    dns.publish_delegation(&hierarchy.root, &hierarchy.com);

    let mut ds = hierarchy.example.ds();
    ds.digest[0] ^= 0xFF;
    dns.publish_ds(&hierarchy.com, "example.com", &[ds]);

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Bogus);
    assert!(!result.chain_valid);
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].zone, "example.com");
    assert_eq!(result.issues[0].kind, IssueKind::DsMismatch);
}

#[tokio::test]
async fn test_unsigned_delegation_is_insecure() {
    let hierarchy = Hierarchy::unlinked();
    let dns = &hierarchy.dns;
    dns.publish_zone(&hierarchy.root);
    dns.publish_zone(&hierarchy.com);
    dns.publish_delegation(&hierarchy.root, &hierarchy.com);
    dns.publish_no_ds(
        "example.com",
        hierarchy.com.nsec(
            "example.com",
            "example2.com",
            &[DNSResourceType::NS, DNSResourceType::RRSIG, DNSResourceType::NSEC],
        ),
    );

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Insecure);
    assert!(!result.chain_valid);
    assert!(result.issues.is_empty());
    assert_eq!(result.links.last().unwrap().status, LinkStatus::Insecure);
}

fn com_only(hierarchy: &Hierarchy) {
    let dns = &hierarchy.dns;
    dns.publish_zone(&hierarchy.root);
    dns.publish_zone(&hierarchy.com);
    dns.publish_delegation(&hierarchy.root, &hierarchy.com);
}

#[tokio::test]
async fn test_nsec3_opt_out_span_is_insecure() {
    let hierarchy = Hierarchy::unlinked();
    com_only(&hierarchy);
    hierarchy.dns.publish_no_ds(
        "example.com",
        hierarchy.com.nsec3_span(true, &[DNSResourceType::NS]),
    );

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Insecure);
    assert!(result.issues.is_empty());
}

#[tokio::test]
async fn test_nsec3_span_without_opt_out_means_no_cut() {
    let hierarchy = Hierarchy::unlinked();
    com_only(&hierarchy);
    hierarchy.dns.publish_no_ds(
        "example.com",
        hierarchy.com.nsec3_span(false, &[DNSResourceType::NS]),
    );

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    // Name lives inside the authenticated com zone
    assert_eq!(result.verdict, ChainVerdict::Secure);
    assert_eq!(result.links.len(), 2);
}

#[tokio::test]
async fn test_name_below_zone_apex_stays_in_parent_zone() {
    let hierarchy = Hierarchy::secure();
    hierarchy.dns.publish_no_ds(
        "www.example.com",
        hierarchy.example.nsec(
            "www.example.com",
            "zzz.example.com",
            &[DNSResourceType::A, DNSResourceType::RRSIG, DNSResourceType::NSEC],
        ),
    );

    let result = analysis(&hierarchy)
        .analyze("www.example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Secure);
    assert_eq!(result.links.len(), 3);
}

#[tokio::test]
async fn test_missing_denial_proof_is_indeterminate() {
    let hierarchy = Hierarchy::secure();
    hierarchy.dns.publish_no_ds("www.example.com", Vec::new());

    let result = analysis(&hierarchy)
        .analyze("www.example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Indeterminate);
    assert_eq!(result.issues[0].kind, IssueKind::UnprovenDenial);
}

#[tokio::test]
async fn test_forged_denial_is_bogus() {
    let hierarchy = Hierarchy::unlinked();
    let dns = &hierarchy.dns;
    dns.publish_zone(&hierarchy.root);
    dns.publish_zone(&hierarchy.com);
    dns.publish_delegation(&hierarchy.root, &hierarchy.com);

    // NSEC signed by a key the com zone never published
    let impostor = ZoneSigner::new("com");
    dns.publish_no_ds(
        "example.com",
        impostor.nsec("example.com", "example2.com", &[DNSResourceType::NS]),
    );

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Bogus);
    assert_eq!(result.issues[0].zone, "example.com");
}

#[tokio::test]
async fn test_wildcard_expanded_nsec_is_not_a_denial() {
    let hierarchy = Hierarchy::secure();
    let wildcard = hierarchy.com.nsec(
        "*.com",
        "zzz.com",
        &[DNSResourceType::A, DNSResourceType::RRSIG, DNSResourceType::NSEC],
    );
    // Same records served under the delegated name
    let renamed = wildcard
        .iter()
        .map(|rr| DNSResource::new("example.com", rr.rtype, rr.ttl, rr.rdata.clone()))
        .collect();
    hierarchy.dns.publish_no_ds("example.com", renamed);

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Bogus);
    assert!(!result.chain_valid);
    assert_eq!(result.issues[0].zone, "example.com");
}

#[tokio::test]
async fn test_key_rollover_any_valid_signature_and_ds_suffices() {
    let hierarchy = Hierarchy::unlinked();
    com_only(&hierarchy);

    let example = &hierarchy.example;
    let rrset = example.dnskey_rrset();
    let mut broken = example.sign(&example.ksk, &rrset, Window::valid());
    if let Some(last) = broken.rdata.last_mut() {
        *last ^= 0x01;
    }
    let valid = example.sign(&example.ksk, &rrset, Window::valid());
    let mut answers = rrset;
    answers.push(broken);
    answers.push(valid);
    hierarchy
        .dns
        .set("example.com", DNSResourceType::DNSKEY, answer(answers));

    // DS for a retired key published alongside the current one
    let retired = ZoneSigner::new("example.com");
    hierarchy
        .dns
        .publish_ds(&hierarchy.com, "example.com", &[retired.ds(), example.ds()]);

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Secure);
    assert!(result.chain_valid);
    assert!(result.issues.is_empty());
    assert_eq!(result.links[2].ds_count, 2);
    assert_eq!(result.links[2].matched_key_tag, Some(example.ksk.key_tag()));
}

#[tokio::test]
async fn test_expired_dnskey_signature_is_bogus() {
    let hierarchy = Hierarchy::secure();
    hierarchy
        .dns
        .publish_zone_with(&hierarchy.example, Window::expired());

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Bogus);
    assert_eq!(result.issues[0].kind, IssueKind::SignatureExpired);
    assert_eq!(result.issues[0].zone, "example.com");
}

#[tokio::test]
async fn test_missing_dnskey_rrsig_is_bogus() {
    let hierarchy = Hierarchy::secure();
    hierarchy.dns.set(
        "com",
        DNSResourceType::DNSKEY,
        answer(hierarchy.com.dnskey_rrset()),
    );

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Bogus);
    assert_eq!(result.issues[0].zone, "com");
    assert_eq!(result.issues[0].kind, IssueKind::MissingRecords);
    // The walk stops at the first failing link
    assert_eq!(result.links.len(), 2);
}

#[tokio::test]
async fn test_dnskey_signed_by_zsk_only_is_bogus() {
    let hierarchy = Hierarchy::secure();
    let rrset = hierarchy.example.dnskey_rrset();
    let sig = hierarchy
        .example
        .sign(&hierarchy.example.zsk, &rrset, Window::valid());
    let mut answers = rrset;
    answers.push(sig);
    hierarchy
        .dns
        .set("example.com", DNSResourceType::DNSKEY, answer(answers));

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Bogus);
}

#[tokio::test]
async fn test_transport_failure_is_indeterminate() {
    let hierarchy = Hierarchy::secure();
    hierarchy.dns.fail("example.com", DNSResourceType::DS);

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Indeterminate);
    assert_eq!(result.issues[0].kind, IssueKind::Transport);
}

#[tokio::test]
async fn test_unsupported_ds_algorithm_is_indeterminate() {
    let hierarchy = Hierarchy::unlinked();
    let dns = &hierarchy.dns;
    dns.publish_zone(&hierarchy.root);
    dns.publish_zone(&hierarchy.com);
    dns.publish_delegation(&hierarchy.root, &hierarchy.com);
    dns.publish_zone(&hierarchy.example);

    let mut ds = hierarchy.example.ds();
    ds.algorithm = DnsSecAlgorithm::EccGost;
    dns.publish_ds(&hierarchy.com, "example.com", &[ds]);

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Indeterminate);
    assert_eq!(result.issues[0].kind, IssueKind::UnsupportedAlgorithm);
}

#[tokio::test]
async fn test_anchor_fetch_timeout_is_indeterminate() {
    let hierarchy = Hierarchy::secure();
    let fetcher = Arc::new(
        ScriptedFetcher::new(common::current_anchor_document(&hierarchy.root))
            .with_delay(Duration::from_secs(30)),
    );
    let store = dnssec_chain::dnssec::TrustAnchorStore::new(
        Arc::new(dnssec_chain::dnssec::trust_anchor::MemoryAnchorCache::default()),
        fetcher,
        Duration::from_secs(3600),
        Duration::from_millis(50),
    );
    let analysis = DnssecAnalysis::new(
        hierarchy.dns.clone(),
        Arc::new(store),
        &ValidatorConfig::default(),
    );

    let result = analysis
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Indeterminate);
    assert!(!result.chain_valid);
    assert_eq!(result.issues[0].kind, IssueKind::TrustAnchor);
    // Nothing was asked of DNS without anchors
    assert_eq!(hierarchy.dns.query_count(), 0);
}

#[tokio::test]
async fn test_anchor_expiring_in_ten_days_flags_key_expiry() {
    let hierarchy = Hierarchy::secure();
    let document = anchor_document(
        &hierarchy.root,
        Utc::now() - chrono::Duration::days(365),
        Some(Utc::now() + chrono::Duration::days(10)),
    );
    let analysis = DnssecAnalysis::new(
        hierarchy.dns.clone(),
        Arc::new(memory_store(Arc::new(ScriptedFetcher::new(document)))),
        &ValidatorConfig::default(),
    );

    let result = analysis
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Secure);
    assert!(result.key_expires_soon);
    assert!(result.nearest_expiry.is_some());
}

#[tokio::test]
async fn test_malformed_anchor_document_is_indeterminate() {
    let hierarchy = Hierarchy::secure();
    let analysis = DnssecAnalysis::new(
        hierarchy.dns.clone(),
        Arc::new(memory_store(Arc::new(ScriptedFetcher::new(
            "<TrustAnchor><Zone>.</Zone><KeyDigest",
        )))),
        &ValidatorConfig::default(),
    );

    let result = analysis
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Indeterminate);
}

#[tokio::test]
async fn test_wrong_anchor_is_bogus_at_root() {
    let hierarchy = Hierarchy::secure();
    let other_root = ZoneSigner::new(".");
    let analysis = DnssecAnalysis::new(
        hierarchy.dns.clone(),
        Arc::new(memory_store(Arc::new(ScriptedFetcher::new(
            common::current_anchor_document(&other_root),
        )))),
        &ValidatorConfig::default(),
    );

    let result = analysis
        .analyze("example.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.verdict, ChainVerdict::Bogus);
    assert_eq!(result.issues[0].zone, ".");
    assert_eq!(result.links.len(), 1);
}

#[tokio::test]
async fn test_cancelled_analysis_propagates() {
    let hierarchy = Hierarchy::secure();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = analysis(&hierarchy)
        .analyze("example.com", Span::none(), &cancel)
        .await;
    assert_eq!(result, Err(AnalysisError::Cancelled));
}

#[tokio::test]
async fn test_invalid_domain_rejected_before_io() {
    let hierarchy = Hierarchy::secure();
    let result = analysis(&hierarchy)
        .analyze("bad..name", Span::none(), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AnalysisError::InvalidDomain(_))));
    assert_eq!(hierarchy.dns.query_count(), 0);
}

#[tokio::test]
async fn test_concurrent_domains_share_anchor_store() {
    let hierarchy = Hierarchy::secure();
    hierarchy.dns.publish_no_ds(
        "www.example.com",
        hierarchy.example.nsec(
            "www.example.com",
            "zzz.example.com",
            &[DNSResourceType::A, DNSResourceType::RRSIG, DNSResourceType::NSEC],
        ),
    );
    let fetcher = Arc::new(ScriptedFetcher::new(common::current_anchor_document(
        &hierarchy.root,
    )));
    let analysis = DnssecAnalysis::new(
        hierarchy.dns.clone(),
        Arc::new(memory_store(fetcher.clone())),
        &ValidatorConfig::default(),
    );

    let cancel = CancellationToken::new();
    let results = futures::future::join_all(
        ["example.com", "www.example.com", "com"]
            .into_iter()
            .map(|d| analysis.analyze(d, Span::none(), &cancel)),
    )
    .await;

    for result in results {
        assert_eq!(result.unwrap().verdict, ChainVerdict::Secure);
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_nxdomain_without_proof_for_unknown_tld() {
    let hierarchy = Hierarchy::secure();
    hierarchy.dns.set(
        "invalid",
        DNSResourceType::DS,
        DnsResponse {
            rcode: ResponseCode::NameError,
            answers: Vec::new(),
            authorities: vec![DNSResource::new(".", DNSResourceType::SOA, 60, vec![0; 22])],
        },
    );

    let result = analysis(&hierarchy)
        .analyze("example.invalid", Span::none(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.verdict, ChainVerdict::Indeterminate);
}

#[tokio::test]
#[ignore] // Needs network access
async fn test_live_validation_cloudflare() {
    let config = ValidatorConfig::default();
    let analysis = DnssecAnalysis::from_config(&config).unwrap();
    let result = analysis
        .analyze("cloudflare.com", Span::none(), &CancellationToken::new())
        .await
        .unwrap();
    println!("{}", serde_json::to_string_pretty(&result).unwrap());
    assert_eq!(result.verdict, ChainVerdict::Secure);
}
