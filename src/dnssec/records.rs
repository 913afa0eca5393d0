//! Typed views over the RDATA of the DNSSEC record types.

use super::errors::{DnsSecError, Result};
use super::{DigestType, DnsSecAlgorithm, calculate_key_tag};
use crate::dns::common::{name_to_wire, parse_rdata_name};
use crate::dns::enums::DNSResourceType;

/// Zone Key flag (RFC 4034 section 2.1.1)
pub const FLAG_ZONE_KEY: u16 = 0x0100;
/// Secure Entry Point flag
pub const FLAG_SEP: u16 = 0x0001;
/// REVOKE flag (RFC 5011)
pub const FLAG_REVOKE: u16 = 0x0080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsKeyRecord {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: DnsSecAlgorithm,
    pub public_key: Vec<u8>,
}

impl DnsKeyRecord {
    pub fn from_rdata(rdata: &[u8]) -> Result<Self> {
        if rdata.len() < 5 {
            return Err(DnsSecError::MalformedRecord("DNSKEY"));
        }
        Ok(Self {
            flags: u16::from_be_bytes([rdata[0], rdata[1]]),
            protocol: rdata[2],
            algorithm: DnsSecAlgorithm::from_u8(rdata[3]),
            public_key: rdata[4..].to_vec(),
        })
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut rdata = Vec::with_capacity(4 + self.public_key.len());
        rdata.extend_from_slice(&self.flags.to_be_bytes());
        rdata.push(self.protocol);
        rdata.push(self.algorithm.to_u8());
        rdata.extend_from_slice(&self.public_key);
        rdata
    }

    pub fn key_tag(&self) -> u16 {
        calculate_key_tag(&self.to_rdata())
    }

    pub fn is_zone_key(&self) -> bool {
        self.flags & FLAG_ZONE_KEY != 0
    }

    pub fn is_sep(&self) -> bool {
        self.flags & FLAG_SEP != 0
    }

    pub fn is_revoked(&self) -> bool {
        self.flags & FLAG_REVOKE != 0
    }

    /// Usable for validating zone data: DNSSEC protocol, zone key, not revoked
    pub fn is_usable(&self) -> bool {
        self.protocol == 3 && self.is_zone_key() && !self.is_revoked()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: DnsSecAlgorithm,
    pub digest_type: DigestType,
    pub digest: Vec<u8>,
}

impl DsRecord {
    pub fn from_rdata(rdata: &[u8]) -> Result<Self> {
        if rdata.len() < 5 {
            return Err(DnsSecError::MalformedRecord("DS"));
        }
        Ok(Self {
            key_tag: u16::from_be_bytes([rdata[0], rdata[1]]),
            algorithm: DnsSecAlgorithm::from_u8(rdata[2]),
            digest_type: DigestType::from_u8(rdata[3]),
            digest: rdata[4..].to_vec(),
        })
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut rdata = self.key_tag.to_be_bytes().to_vec();
        rdata.push(self.algorithm.to_u8());
        rdata.push(self.digest_type.to_u8());
        rdata.extend_from_slice(&self.digest);
        rdata
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrsigRecord {
    pub type_covered: DNSResourceType,
    pub algorithm: DnsSecAlgorithm,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: String,
    pub signature: Vec<u8>,
}

impl RrsigRecord {
    pub fn from_rdata(rdata: &[u8]) -> Result<Self> {
        if rdata.len() < 19 {
            return Err(DnsSecError::MalformedRecord("RRSIG"));
        }
        let u32_at = |i: usize| u32::from_be_bytes([rdata[i], rdata[i + 1], rdata[i + 2], rdata[i + 3]]);

        let (signer_name, name_len) =
            parse_rdata_name(&rdata[18..]).ok_or(DnsSecError::MalformedRecord("RRSIG"))?;
        let signature = rdata[18 + name_len..].to_vec();
        if signature.is_empty() {
            return Err(DnsSecError::InvalidSignature);
        }

        Ok(Self {
            type_covered: u16::from_be_bytes([rdata[0], rdata[1]]).into(),
            algorithm: DnsSecAlgorithm::from_u8(rdata[2]),
            labels: rdata[3],
            original_ttl: u32_at(4),
            expiration: u32_at(8),
            inception: u32_at(12),
            key_tag: u16::from_be_bytes([rdata[16], rdata[17]]),
            signer_name: signer_name.to_ascii_lowercase(),
            signature,
        })
    }

    /// RRSIG RDATA up to but excluding the signature field, with the signer
    /// name in canonical form (RFC 4034 section 3.1.8.1).
    pub fn rdata_without_signature(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(18 + self.signer_name.len() + 2);
        data.extend_from_slice(&u16::from(self.type_covered).to_be_bytes());
        data.push(self.algorithm.to_u8());
        data.push(self.labels);
        data.extend_from_slice(&self.original_ttl.to_be_bytes());
        data.extend_from_slice(&self.expiration.to_be_bytes());
        data.extend_from_slice(&self.inception.to_be_bytes());
        data.extend_from_slice(&self.key_tag.to_be_bytes());
        data.extend_from_slice(&name_to_wire(&self.signer_name));
        data
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut data = self.rdata_without_signature();
        data.extend_from_slice(&self.signature);
        data
    }

    /// Check the validity window against `now` (seconds since the epoch)
    pub fn check_validity(&self, now: u32) -> Result<()> {
        if now < self.inception {
            return Err(DnsSecError::SignatureNotYetValid);
        }
        if now > self.expiration {
            return Err(DnsSecError::SignatureExpired);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsecRecord {
    pub next_name: String,
    pub types: Vec<u16>,
}

impl NsecRecord {
    pub fn from_rdata(rdata: &[u8]) -> Result<Self> {
        let (next_name, used) =
            parse_rdata_name(rdata).ok_or(DnsSecError::MalformedRecord("NSEC"))?;
        Ok(Self {
            next_name: next_name.to_ascii_lowercase(),
            types: parse_type_bitmap(&rdata[used..]).ok_or(DnsSecError::MalformedRecord("NSEC"))?,
        })
    }

    pub fn has_type(&self, rtype: DNSResourceType) -> bool {
        self.types.contains(&u16::from(rtype))
    }
}

/// NSEC3 opt-out flag (RFC 5155 section 3.1.2.1)
pub const NSEC3_FLAG_OPT_OUT: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3Record {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed_owner: Vec<u8>,
    pub types: Vec<u16>,
}

impl Nsec3Record {
    pub fn from_rdata(rdata: &[u8]) -> Result<Self> {
        let malformed = || DnsSecError::MalformedRecord("NSEC3");
        let salt_len = *rdata.get(4).ok_or_else(malformed)? as usize;
        let salt = rdata.get(5..5 + salt_len).ok_or_else(malformed)?.to_vec();
        let pos = 5 + salt_len;
        let hash_len = *rdata.get(pos).ok_or_else(malformed)? as usize;
        let next_hashed_owner = rdata
            .get(pos + 1..pos + 1 + hash_len)
            .ok_or_else(malformed)?
            .to_vec();
        let types = parse_type_bitmap(&rdata[pos + 1 + hash_len..]).ok_or_else(malformed)?;

        Ok(Self {
            hash_algorithm: rdata[0],
            flags: rdata[1],
            iterations: u16::from_be_bytes([rdata[2], rdata[3]]),
            salt,
            next_hashed_owner,
            types,
        })
    }

    pub fn opt_out(&self) -> bool {
        self.flags & NSEC3_FLAG_OPT_OUT != 0
    }

    pub fn has_type(&self, rtype: DNSResourceType) -> bool {
        self.types.contains(&u16::from(rtype))
    }
}

/// Decode an NSEC/NSEC3 type bit map (RFC 4034 section 4.1.2)
pub fn parse_type_bitmap(mut data: &[u8]) -> Option<Vec<u16>> {
    let mut types = Vec::new();
    while !data.is_empty() {
        let window = u16::from(*data.first()?);
        let len = *data.get(1)? as usize;
        if len == 0 || len > 32 {
            return None;
        }
        let bitmap = data.get(2..2 + len)?;
        for (i, byte) in bitmap.iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    types.push(window * 256 + (i as u16) * 8 + bit);
                }
            }
        }
        data = &data[2 + len..];
    }
    Some(types)
}

/// Encode a type bit map; the inverse of [`parse_type_bitmap`]
pub fn encode_type_bitmap(types: &[u16]) -> Vec<u8> {
    let mut sorted = types.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let window = sorted[i] >> 8;
        let mut bitmap = [0u8; 32];
        let mut len = 0;
        while i < sorted.len() && sorted[i] >> 8 == window {
            let low = (sorted[i] & 0xFF) as usize;
            bitmap[low / 8] |= 0x80 >> (low % 8);
            len = low / 8 + 1;
            i += 1;
        }
        out.push(window as u8);
        out.push(len as u8);
        out.extend_from_slice(&bitmap[..len]);
    }
    out
}
