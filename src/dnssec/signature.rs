//! RRSIG verification over canonically encoded RRsets (RFC 4034 section 3.1.8.1,
//! RFC 4035 section 5.3).

use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};
use tracing::trace;

use super::algorithm::{DnsSecAlgorithm, Verifier};
use super::errors::{DnsSecError, Result};
use super::records::{DnsKeyRecord, RrsigRecord};
use crate::dns::common::{label_count, name_labels, name_to_wire};
use crate::dns::enums::DNSResourceClass;
use crate::dns::resource::DNSResource;

/// Checks RRSIGs against DNSKEYs at a fixed point in time.
#[derive(Debug, Clone, Copy)]
pub struct SignatureVerifier {
    now: u32,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier {
    /// Verifier using the current wall clock
    pub fn new() -> Self {
        Self::at(unix_now())
    }

    /// Verifier pinned to `now`, seconds since the epoch
    pub fn at(now: u32) -> Self {
        Self { now }
    }

    pub fn now(&self) -> u32 {
        self.now
    }

    /// Whether `rrsig` is a valid signature by `key` over `rrset`.
    /// Every failure, malformed input included, is just `false`.
    pub fn verify(&self, rrsig: &RrsigRecord, rrset: &[DNSResource], key: &DnsKeyRecord) -> bool {
        self.check(rrsig, rrset, key).is_ok()
    }

    /// Like [`verify`](Self::verify) but reports why a signature was rejected
    pub fn check(
        &self,
        rrsig: &RrsigRecord,
        rrset: &[DNSResource],
        key: &DnsKeyRecord,
    ) -> Result<()> {
        let first = rrset
            .first()
            .ok_or(DnsSecError::RrsigMismatch("empty RRset".to_string()))?;

        if rrsig.type_covered != first.rtype {
            return Err(DnsSecError::RrsigMismatch(format!(
                "covers {} but RRset is {}",
                rrsig.type_covered, first.rtype
            )));
        }
        if rrsig.labels > label_count(&first.name()) {
            return Err(DnsSecError::RrsigMismatch(format!(
                "label count {} exceeds owner {}",
                rrsig.labels,
                first.name()
            )));
        }
        if rrsig.algorithm != key.algorithm {
            return Err(DnsSecError::RrsigMismatch(format!(
                "algorithm {} does not match key algorithm {}",
                rrsig.algorithm, key.algorithm
            )));
        }
        if rrsig.key_tag != key.key_tag() {
            return Err(DnsSecError::RrsigMismatch(format!(
                "key tag {} does not match key {}",
                rrsig.key_tag,
                key.key_tag()
            )));
        }

        rrsig.check_validity(self.now)?;

        let signed_data = canonical_signed_data(rrsig, rrset)?;
        trace!(
            "Verifying {} RRSIG over {} bytes with key {}",
            rrsig.type_covered,
            signed_data.len(),
            key.key_tag()
        );
        verify_signature(key.algorithm, &key.public_key, &signed_data, &rrsig.signature)
    }
}

/// Seconds since the epoch, saturating at the end of the 32-bit range
pub fn unix_now() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp().max(0)).unwrap_or(u32::MAX)
}

/// The byte string an RRSIG signs: its own RDATA without the signature,
/// then every record of the RRset in canonical form and order.
pub fn canonical_signed_data(rrsig: &RrsigRecord, rrset: &[DNSResource]) -> Result<Vec<u8>> {
    let mut records: Vec<Vec<u8>> = Vec::with_capacity(rrset.len());

    for rr in rrset {
        if rr.rtype != rrsig.type_covered {
            return Err(DnsSecError::RrsigMismatch(format!(
                "{} record in {} RRset",
                rr.rtype, rrsig.type_covered
            )));
        }
        if rr.rdata.len() > u16::MAX as usize {
            return Err(DnsSecError::MalformedRecord("RRset member"));
        }

        let owner = signed_owner(&rr.name(), rrsig.labels);
        let mut wire = name_to_wire(&owner);
        wire.extend_from_slice(&u16::from(rr.rtype).to_be_bytes());
        wire.extend_from_slice(&u16::from(DNSResourceClass::IN).to_be_bytes());
        wire.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
        wire.extend_from_slice(&(rr.rdata.len() as u16).to_be_bytes());
        records.push(wire);
    }

    // Canonical RRset order compares the RDATA alone (RFC 4034 section 6.3)
    let mut indexed: Vec<(Vec<u8>, &[u8])> = records
        .into_iter()
        .zip(rrset.iter().map(|rr| rr.rdata.as_slice()))
        .collect();
    indexed.sort_by(|a, b| a.1.cmp(b.1));
    indexed.dedup_by(|a, b| a.1 == b.1);

    let mut data = rrsig.rdata_without_signature();
    for (prefix, rdata) in indexed {
        data.extend_from_slice(&prefix);
        data.extend_from_slice(rdata);
    }
    Ok(data)
}

/// Owner name as signed: wildcard expansions are signed as `*.<closest encloser>`
fn signed_owner(owner: &str, rrsig_labels: u8) -> String {
    let labels = name_labels(owner);
    let wanted = rrsig_labels as usize;
    if wanted >= labels.len() {
        return owner.to_string();
    }
    let suffix = labels[labels.len() - wanted..].join(".");
    if suffix.is_empty() {
        "*".to_string()
    } else {
        format!("*.{}", suffix)
    }
}

/// Raw cryptographic check of `sig` over `message` with a DNSKEY public key field
pub fn verify_signature(
    algorithm: DnsSecAlgorithm,
    public_key: &[u8],
    message: &[u8],
    sig: &[u8],
) -> Result<()> {
    let verifier = algorithm
        .verifier()
        .ok_or(DnsSecError::UnsupportedAlgorithm(algorithm.to_u8()))?;

    match verifier {
        Verifier::Rsa(params) => {
            let (e, n) = parse_rsa_public_key(public_key)?;
            RsaPublicKeyComponents { n, e }
                .verify(params, message, sig)
                .map_err(|_| DnsSecError::SignatureVerificationFailed)
        }
        Verifier::Ecdsa {
            algorithm,
            coordinate_len,
        } => {
            if public_key.len() != coordinate_len * 2 {
                return Err(DnsSecError::InvalidPublicKey);
            }
            let mut point = Vec::with_capacity(1 + public_key.len());
            point.push(0x04);
            point.extend_from_slice(public_key);

            let fixed;
            let sig = if sig.len() == coordinate_len * 2 {
                sig
            } else {
                fixed = der_to_fixed(sig, coordinate_len)?;
                &fixed
            };

            UnparsedPublicKey::new(algorithm, &point)
                .verify(message, sig)
                .map_err(|_| DnsSecError::SignatureVerificationFailed)
        }
        Verifier::Ed25519 => {
            if public_key.len() != 32 {
                return Err(DnsSecError::InvalidPublicKey);
            }
            UnparsedPublicKey::new(&signature::ED25519, public_key)
                .verify(message, sig)
                .map_err(|_| DnsSecError::SignatureVerificationFailed)
        }
    }
}

/// Split an RFC 3110 RSA public key into (exponent, modulus), leading zeros stripped
pub fn parse_rsa_public_key(key: &[u8]) -> Result<(&[u8], &[u8])> {
    let (exp_len, rest) = match key.split_first() {
        Some((0, rest)) if rest.len() >= 2 => {
            (u16::from_be_bytes([rest[0], rest[1]]) as usize, &rest[2..])
        }
        Some((&len, rest)) if len != 0 => (len as usize, rest),
        _ => return Err(DnsSecError::InvalidPublicKey),
    };

    if exp_len == 0 || rest.len() <= exp_len {
        return Err(DnsSecError::InvalidPublicKey);
    }
    let (exponent, modulus) = rest.split_at(exp_len);
    let exponent = strip_leading_zeros(exponent);
    let modulus = strip_leading_zeros(modulus);
    if exponent.is_empty() || modulus.is_empty() {
        return Err(DnsSecError::InvalidPublicKey);
    }
    Ok((exponent, modulus))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Convert a DER `SEQUENCE { INTEGER r, INTEGER s }` into fixed-width r||s
pub fn der_to_fixed(der: &[u8], coordinate_len: usize) -> Result<Vec<u8>> {
    let (tag, body, rest) = read_der_element(der)?;
    if tag != 0x30 || !rest.is_empty() {
        return Err(DnsSecError::InvalidSignature);
    }

    let (r_tag, r, rest) = read_der_element(body)?;
    let (s_tag, s, rest) = read_der_element(rest)?;
    if r_tag != 0x02 || s_tag != 0x02 || !rest.is_empty() {
        return Err(DnsSecError::InvalidSignature);
    }

    let mut fixed = vec![0u8; coordinate_len * 2];
    for (i, int) in [r, s].into_iter().enumerate() {
        let int = strip_leading_zeros(int);
        if int.len() > coordinate_len {
            return Err(DnsSecError::InvalidSignature);
        }
        let end = (i + 1) * coordinate_len;
        fixed[end - int.len()..end].copy_from_slice(int);
    }
    Ok(fixed)
}

/// Convert fixed-width r||s into a DER `SEQUENCE { INTEGER r, INTEGER s }`
pub fn fixed_to_der(fixed: &[u8]) -> Result<Vec<u8>> {
    if fixed.is_empty() || fixed.len() % 2 != 0 {
        return Err(DnsSecError::InvalidSignature);
    }
    let (r, s) = fixed.split_at(fixed.len() / 2);

    let mut body = Vec::with_capacity(fixed.len() + 6);
    for int in [r, s] {
        let int = strip_leading_zeros(int);
        let pad = int.first().is_none_or(|&b| b & 0x80 != 0);
        body.push(0x02);
        write_der_length(&mut body, int.len() + usize::from(pad));
        if pad {
            body.push(0x00);
        }
        body.extend_from_slice(int);
    }

    let mut der = Vec::with_capacity(body.len() + 3);
    der.push(0x30);
    write_der_length(&mut der, body.len());
    der.extend_from_slice(&body);
    Ok(der)
}

/// Returns (tag, contents, remainder)
fn read_der_element(data: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let bad = DnsSecError::InvalidSignature;
    let tag = *data.first().ok_or(bad.clone())?;
    let first_len = *data.get(1).ok_or(bad.clone())?;

    let (len, header) = match first_len {
        l if l < 0x80 => (l as usize, 2),
        0x81 => (*data.get(2).ok_or(bad.clone())? as usize, 3),
        0x82 => {
            let hi = *data.get(2).ok_or(bad.clone())? as usize;
            let lo = *data.get(3).ok_or(bad.clone())? as usize;
            ((hi << 8) | lo, 4)
        }
        _ => return Err(bad),
    };

    let body = data.get(header..header + len).ok_or(bad)?;
    Ok((tag, body, &data[header + len..]))
}

fn write_der_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
}
