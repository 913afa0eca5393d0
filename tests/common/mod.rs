//! Shared fixtures: an in-memory signed DNS hierarchy and scripted trust
//! anchor sources.

#![allow(dead_code)] // Not every test file uses every helper

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dnssec_chain::dns::client::{DnsQuery, DnsResponse};
use dnssec_chain::dns::common::{label_count, normalize_name};
use dnssec_chain::dns::enums::{DNSResourceType, ResponseCode};
use dnssec_chain::dns::resource::DNSResource;
use dnssec_chain::dnssec::denial::encode_nsec3_hash;
use dnssec_chain::dnssec::records::{NSEC3_FLAG_OPT_OUT, encode_type_bitmap};
use dnssec_chain::dnssec::signature::canonical_signed_data;
use dnssec_chain::dnssec::trust_anchor::{AnchorFetcher, MemoryAnchorCache};
use dnssec_chain::dnssec::{
    DigestType, DnsKeyRecord, DnsSecAlgorithm, DsRecord, HashAlgorithm, RrsigRecord,
    TrustAnchorStore, compute_digest,
};
use dnssec_chain::error::{AnchorError, DnsError};
use parking_lot::Mutex;
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const TTL: u32 = 3600;
const DAY: i64 = 86_400;

/// An ECDSA P-256 key able to sign RRsets
pub struct SigningKey {
    pair: EcdsaKeyPair,
    pub record: DnsKeyRecord,
}

impl SigningKey {
    pub fn generate(flags: u16) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        let record = DnsKeyRecord {
            flags,
            protocol: 3,
            algorithm: DnsSecAlgorithm::EcdsaP256Sha256,
            public_key: pair.public_key().as_ref()[1..].to_vec(),
        };
        Self { pair, record }
    }

    pub fn key_tag(&self) -> u16 {
        self.record.key_tag()
    }
}

/// Signing window relative to now, in seconds
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub inception: i64,
    pub expiration: i64,
}

impl Window {
    pub fn valid() -> Self {
        Self {
            inception: -DAY,
            expiration: 30 * DAY,
        }
    }

    pub fn expired() -> Self {
        Self {
            inception: -30 * DAY,
            expiration: -DAY,
        }
    }
}

/// A signed zone with a KSK and a ZSK
pub struct ZoneSigner {
    pub name: String,
    pub ksk: SigningKey,
    pub zsk: SigningKey,
}

impl ZoneSigner {
    pub fn new(name: &str) -> Self {
        Self {
            name: normalize_name(name),
            ksk: SigningKey::generate(257),
            zsk: SigningKey::generate(256),
        }
    }

    pub fn dnskey_rrset(&self) -> Vec<DNSResource> {
        [&self.ksk, &self.zsk]
            .iter()
            .map(|k| DNSResource::new(&self.name, DNSResourceType::DNSKEY, TTL, k.record.to_rdata()))
            .collect()
    }

    /// DS record for this zone's KSK, as published by the parent
    pub fn ds(&self) -> DsRecord {
        DsRecord {
            key_tag: self.ksk.key_tag(),
            algorithm: self.ksk.record.algorithm,
            digest_type: DigestType::Sha256,
            digest: compute_digest(&self.name, &self.ksk.record, HashAlgorithm::Sha256),
        }
    }

    pub fn sign(&self, key: &SigningKey, rrset: &[DNSResource], window: Window) -> DNSResource {
        let now = Utc::now().timestamp();
        let owner = rrset[0].name();
        let mut rrsig = RrsigRecord {
            type_covered: rrset[0].rtype,
            algorithm: key.record.algorithm,
            labels: label_count(&owner),
            original_ttl: rrset[0].ttl,
            expiration: (now + window.expiration) as u32,
            inception: (now + window.inception) as u32,
            key_tag: key.key_tag(),
            signer_name: self.name.clone(),
            signature: Vec::new(),
        };
        let data = canonical_signed_data(&rrsig, rrset).unwrap();
        let rng = SystemRandom::new();
        rrsig.signature = key.pair.sign(&rng, &data).unwrap().as_ref().to_vec();
        DNSResource::new(&owner, DNSResourceType::RRSIG, TTL, rrsig.to_rdata())
    }

    /// NSEC owned by `owner` in this zone, signed by the ZSK
    pub fn nsec(&self, owner: &str, next: &str, types: &[DNSResourceType]) -> Vec<DNSResource> {
        let mut rdata = dnssec_chain::dns::common::name_to_wire(next);
        let codes: Vec<u16> = types.iter().map(|&t| u16::from(t)).collect();
        rdata.extend(encode_type_bitmap(&codes));
        let rrset = vec![DNSResource::new(owner, DNSResourceType::NSEC, TTL, rdata)];
        let sig = self.sign(&self.zsk, &rrset, Window::valid());
        vec![rrset[0].clone(), sig]
    }

    /// NSEC3 spanning nearly the whole hash space, signed by the ZSK
    pub fn nsec3_span(&self, opt_out: bool, types: &[DNSResourceType]) -> Vec<DNSResource> {
        let flags = if opt_out { NSEC3_FLAG_OPT_OUT } else { 0 };
        let mut rdata = vec![1, flags, 0, 0, 0, 20];
        rdata.extend_from_slice(&[0xFF; 20]);
        let codes: Vec<u16> = types.iter().map(|&t| u16::from(t)).collect();
        rdata.extend(encode_type_bitmap(&codes));

        let owner = format!("{}.{}", encode_nsec3_hash(&[0x00; 20]), self.name);
        let rrset = vec![DNSResource::new(&owner, DNSResourceType::NSEC3, TTL, rdata)];
        let sig = self.sign(&self.zsk, &rrset, Window::valid());
        vec![rrset[0].clone(), sig]
    }
}

/// Root-anchors.xml naming the root KSK
pub fn anchor_document(
    root: &ZoneSigner,
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
) -> String {
    let ds = root.ds();
    let until = valid_until
        .map(|t| format!(r#" validUntil="{}""#, t.to_rfc3339()))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<TrustAnchor id="test" source="mock">
<Zone>.</Zone>
<KeyDigest id="test-ksk" validFrom="{}"{}>
<KeyTag>{}</KeyTag>
<Algorithm>{}</Algorithm>
<DigestType>{}</DigestType>
<Digest>{}</Digest>
</KeyDigest>
</TrustAnchor>
"#,
        valid_from.to_rfc3339(),
        until,
        ds.key_tag,
        ds.algorithm.to_u8(),
        ds.digest_type.to_u8(),
        hex::encode_upper(&ds.digest)
    )
}

pub fn current_anchor_document(root: &ZoneSigner) -> String {
    anchor_document(root, Utc::now() - chrono::Duration::days(365), None)
}

/// In-memory DNS answering from a table of responses
#[derive(Default)]
pub struct MockDns {
    responses: Mutex<HashMap<(String, u16), DnsResponse>>,
    failing: Mutex<HashSet<(String, u16)>>,
    queries: AtomicUsize,
}

impl MockDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, rtype: DNSResourceType, response: DnsResponse) {
        self.responses
            .lock()
            .insert((normalize_name(name), rtype.into()), response);
    }

    pub fn fail(&self, name: &str, rtype: DNSResourceType) {
        self.failing.lock().insert((normalize_name(name), rtype.into()));
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// DNSKEY answer for `zone`, signed by its KSK within `window`
    pub fn publish_zone_with(&self, zone: &ZoneSigner, window: Window) {
        let rrset = zone.dnskey_rrset();
        let sig = zone.sign(&zone.ksk, &rrset, window);
        let mut answers = rrset;
        answers.push(sig);
        self.set(&zone.name, DNSResourceType::DNSKEY, answer(answers));
    }

    pub fn publish_zone(&self, zone: &ZoneSigner) {
        self.publish_zone_with(zone, Window::valid());
    }

    /// Signed DS answer for `child_name` in `parent`
    pub fn publish_ds(&self, parent: &ZoneSigner, child_name: &str, ds: &[DsRecord]) {
        let rrset: Vec<DNSResource> = ds
            .iter()
            .map(|d| DNSResource::new(child_name, DNSResourceType::DS, TTL, d.to_rdata()))
            .collect();
        let sig = parent.sign(&parent.zsk, &rrset, Window::valid());
        let mut answers = rrset;
        answers.push(sig);
        self.set(child_name, DNSResourceType::DS, answer(answers));
    }

    pub fn publish_delegation(&self, parent: &ZoneSigner, child: &ZoneSigner) {
        self.publish_ds(parent, &child.name, &[child.ds()]);
    }

    /// Negative DS answer carrying `authorities`
    pub fn publish_no_ds(&self, name: &str, authorities: Vec<DNSResource>) {
        self.set(
            name,
            DNSResourceType::DS,
            DnsResponse {
                rcode: ResponseCode::NoError,
                answers: Vec::new(),
                authorities,
            },
        );
    }
}

pub fn answer(answers: Vec<DNSResource>) -> DnsResponse {
    DnsResponse {
        rcode: ResponseCode::NoError,
        answers,
        authorities: Vec::new(),
    }
}

#[async_trait]
impl DnsQuery for MockDns {
    async fn query(
        &self,
        name: &str,
        rtype: DNSResourceType,
        cancel: &CancellationToken,
    ) -> Result<DnsResponse, DnsError> {
        if cancel.is_cancelled() {
            return Err(DnsError::Cancelled);
        }
        self.queries.fetch_add(1, Ordering::SeqCst);

        let key = (normalize_name(name), u16::from(rtype));
        if self.failing.lock().contains(&key) {
            return Err(DnsError::Timeout {
                name: name.to_string(),
            });
        }
        Ok(self
            .responses
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| DnsResponse::empty(ResponseCode::NameError)))
    }
}

/// Anchor source returning a fixed document after an optional delay
pub struct ScriptedFetcher {
    document: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: Some(document.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with a transport error
    pub fn unreachable() -> Self {
        Self {
            document: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnchorFetcher for ScriptedFetcher {
    async fn fetch(&self) -> Result<String, AnchorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.document
            .clone()
            .ok_or_else(|| AnchorError::Fetch("connection refused".to_string()))
    }
}

/// Store over an in-memory cache and the given fetcher
pub fn memory_store(fetcher: Arc<ScriptedFetcher>) -> TrustAnchorStore {
    TrustAnchorStore::new(
        Arc::new(MemoryAnchorCache::default()),
        fetcher,
        Duration::from_secs(3600),
        Duration::from_secs(5),
    )
}

/// Root, `com` and `example.com`, all signed and linked
pub struct Hierarchy {
    pub root: ZoneSigner,
    pub com: ZoneSigner,
    pub example: ZoneSigner,
    pub dns: Arc<MockDns>,
}

impl Hierarchy {
    pub fn secure() -> Self {
        let hierarchy = Self::unlinked();
        hierarchy.dns.publish_zone(&hierarchy.root);
        hierarchy.dns.publish_zone(&hierarchy.com);
        hierarchy.dns.publish_zone(&hierarchy.example);
        hierarchy.dns.publish_delegation(&hierarchy.root, &hierarchy.com);
        hierarchy.dns.publish_delegation(&hierarchy.com, &hierarchy.example);
        hierarchy
    }

    /// Keys generated, nothing published
    pub fn unlinked() -> Self {
        Self {
            root: ZoneSigner::new("."),
            com: ZoneSigner::new("com"),
            example: ZoneSigner::new("example.com"),
            dns: Arc::new(MockDns::new()),
        }
    }

    pub fn anchor_store(&self) -> TrustAnchorStore {
        memory_store(Arc::new(ScriptedFetcher::new(current_anchor_document(
            &self.root,
        ))))
    }
}
