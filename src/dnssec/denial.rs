use ring::digest;
use std::cmp::Ordering;
use tracing::{debug, trace};

use super::constants::MAX_NSEC3_ITERATIONS;
use super::errors::{DnsSecError, Result};
use super::records::{Nsec3Record, NsecRecord};
use crate::dns::common::{canonical_name_cmp, name_labels, name_to_wire, normalize_name};
use crate::dns::enums::DNSResourceType;
use crate::dns::resource::DNSResource;

/// What authenticated NSEC/NSEC3 records say about a DS-less name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsAbsence {
    /// The name is a delegation without DS: an unsigned child zone
    InsecureDelegation,
    /// The name is not a delegation point (no NS, or does not exist)
    NotZoneCut,
    /// The records do not settle the question
    Unproven,
}

/// Interprets NSEC and NSEC3 records from the authority section of a
/// negative DS answer. Signatures must have been checked by the caller.
#[derive(Debug, Default)]
pub struct DenialOfExistenceValidator;

impl DenialOfExistenceValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn prove_ds_absence(&self, name: &str, records: &[DNSResource]) -> Result<DsAbsence> {
        let name = normalize_name(name);

        let nsec: Vec<(String, NsecRecord)> = records
            .iter()
            .filter(|rr| rr.rtype == DNSResourceType::NSEC)
            .filter_map(|rr| Some((normalize_name(&rr.name()), NsecRecord::from_rdata(&rr.rdata).ok()?)))
            .collect();
        if !nsec.is_empty() {
            let outcome = self.nsec_outcome(&name, &nsec);
            debug!("NSEC proof for {}: {:?}", name, outcome);
            return Ok(outcome);
        }

        let nsec3: Vec<(String, Nsec3Record)> = records
            .iter()
            .filter(|rr| rr.rtype == DNSResourceType::NSEC3)
            .filter_map(|rr| Some((normalize_name(&rr.name()), Nsec3Record::from_rdata(&rr.rdata).ok()?)))
            .collect();
        if !nsec3.is_empty() {
            let outcome = self.nsec3_outcome(&name, &nsec3)?;
            debug!("NSEC3 proof for {}: {:?}", name, outcome);
            return Ok(outcome);
        }

        Ok(DsAbsence::Unproven)
    }

    fn nsec_outcome(&self, name: &str, records: &[(String, NsecRecord)]) -> DsAbsence {
        if let Some((_, nsec)) = records.iter().find(|(owner, _)| owner == name) {
            return type_bits_outcome(&nsec.types);
        }

        let covered = records
            .iter()
            .any(|(owner, nsec)| name_in_range(owner, &nsec.next_name, name));
        if covered {
            DsAbsence::NotZoneCut
        } else {
            DsAbsence::Unproven
        }
    }

    fn nsec3_outcome(&self, name: &str, records: &[(String, Nsec3Record)]) -> Result<DsAbsence> {
        let mut covering_outcome = DsAbsence::Unproven;

        for (owner, nsec3) in records {
            if nsec3.hash_algorithm != 1 {
                trace!("Skipping NSEC3 with hash algorithm {}", nsec3.hash_algorithm);
                continue;
            }
            let Some(owner_hash) = owner_hash(owner) else {
                continue;
            };

            let hash = nsec3_hash(name, &nsec3.salt, nsec3.iterations)?;
            if hash == owner_hash {
                return Ok(type_bits_outcome(&nsec3.types));
            }
            if hash_in_range(&owner_hash, &nsec3.next_hashed_owner, &hash) {
                covering_outcome = if nsec3.opt_out() {
                    DsAbsence::InsecureDelegation
                } else {
                    DsAbsence::NotZoneCut
                };
            }
        }

        Ok(covering_outcome)
    }
}

/// Decide from the type bitmap of a record owned by the name itself
fn type_bits_outcome(types: &[u16]) -> DsAbsence {
    let has = |t: DNSResourceType| types.contains(&u16::from(t));
    if has(DNSResourceType::DS) {
        // Claims a DS exists while none was returned
        DsAbsence::Unproven
    } else if has(DNSResourceType::SOA) {
        // Child-side apex record, says nothing about the parent's DS
        DsAbsence::Unproven
    } else if has(DNSResourceType::NS) {
        DsAbsence::InsecureDelegation
    } else {
        DsAbsence::NotZoneCut
    }
}

/// Whether `name` falls strictly between an NSEC owner and its next name.
/// The last NSEC of a zone wraps around to the apex.
pub fn name_in_range(owner: &str, next: &str, name: &str) -> bool {
    let after_owner = canonical_name_cmp(owner, name) == Ordering::Less;
    let before_next = canonical_name_cmp(name, next) == Ordering::Less;
    if canonical_name_cmp(owner, next) == Ordering::Less {
        after_owner && before_next
    } else {
        after_owner || before_next
    }
}

fn hash_in_range(owner: &[u8], next: &[u8], hash: &[u8]) -> bool {
    if owner < next {
        owner < hash && hash < next
    } else {
        owner < hash || hash < next
    }
}

/// Raw hash from the first label of an NSEC3 owner name
fn owner_hash(owner: &str) -> Option<Vec<u8>> {
    let label = name_labels(owner).into_iter().next()?;
    base32::decode(
        base32::Alphabet::Rfc4648Hex { padding: false },
        &label.to_ascii_uppercase(),
    )
}

/// NSEC3 hash of a name (RFC 5155 section 5), SHA-1 only
pub fn nsec3_hash(name: &str, salt: &[u8], iterations: u16) -> Result<Vec<u8>> {
    if iterations > MAX_NSEC3_ITERATIONS {
        return Err(DnsSecError::TooManyIterations(iterations));
    }

    let mut input = name_to_wire(name);
    input.extend_from_slice(salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input);

    for _ in 0..iterations {
        let mut next_input = hash.as_ref().to_vec();
        next_input.extend_from_slice(salt);
        hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &next_input);
    }

    Ok(hash.as_ref().to_vec())
}

/// Base32hex presentation of an NSEC3 hash, as used in owner names
pub fn encode_nsec3_hash(hash: &[u8]) -> String {
    base32::encode(base32::Alphabet::Rfc4648Hex { padding: false }, hash).to_ascii_lowercase()
}
