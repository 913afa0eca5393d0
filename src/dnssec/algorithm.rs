use ring::signature;
use std::fmt;

/// DNSSEC algorithm numbers (RFC 4034, 5155, 5702, 6605, 8080, 8624)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsSecAlgorithm {
    /// RSA/MD5 (deprecated)
    RsaMd5,
    /// DSA/SHA1 (RFC 2536)
    Dsa,
    /// RSA/SHA-1 (RFC 3110)
    RsaSha1,
    /// DSA-NSEC3-SHA1 (RFC 5155)
    DsaNsec3Sha1,
    /// RSASHA1-NSEC3-SHA1 (RFC 5155)
    RsaSha1Nsec3Sha1,
    /// RSA/SHA-256 (RFC 5702)
    RsaSha256,
    /// RSA/SHA-512 (RFC 5702)
    RsaSha512,
    /// GOST R 34.10-2001 (RFC 5933)
    EccGost,
    /// ECDSA Curve P-256 with SHA-256 (RFC 6605)
    EcdsaP256Sha256,
    /// ECDSA Curve P-384 with SHA-384 (RFC 6605)
    EcdsaP384Sha384,
    /// Ed25519 (RFC 8080)
    Ed25519,
    /// Ed448 (RFC 8080)
    Ed448,
    /// Any other number, never verifiable
    Unassigned(u8),
}

/// How signatures of a given algorithm are checked
#[derive(Clone, Copy)]
pub enum Verifier {
    /// PKCS#1 v1.5 over the RFC 3110 exponent/modulus encoding
    Rsa(&'static signature::RsaParameters),
    /// Fixed-width r||s signature over an X||Y public key
    Ecdsa {
        algorithm: &'static signature::EcdsaVerificationAlgorithm,
        coordinate_len: usize,
    },
    /// Raw 32-byte public key
    Ed25519,
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verifier::Rsa(_) => write!(f, "Rsa"),
            Verifier::Ecdsa { coordinate_len, .. } => write!(f, "Ecdsa({})", coordinate_len),
            Verifier::Ed25519 => write!(f, "Ed25519"),
        }
    }
}

impl DnsSecAlgorithm {
    /// Create from algorithm number
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::RsaMd5,
            3 => Self::Dsa,
            5 => Self::RsaSha1,
            6 => Self::DsaNsec3Sha1,
            7 => Self::RsaSha1Nsec3Sha1,
            8 => Self::RsaSha256,
            10 => Self::RsaSha512,
            12 => Self::EccGost,
            13 => Self::EcdsaP256Sha256,
            14 => Self::EcdsaP384Sha384,
            15 => Self::Ed25519,
            16 => Self::Ed448,
            other => Self::Unassigned(other),
        }
    }

    /// Convert to algorithm number
    pub fn to_u8(self) -> u8 {
        match self {
            Self::RsaMd5 => 1,
            Self::Dsa => 3,
            Self::RsaSha1 => 5,
            Self::DsaNsec3Sha1 => 6,
            Self::RsaSha1Nsec3Sha1 => 7,
            Self::RsaSha256 => 8,
            Self::RsaSha512 => 10,
            Self::EccGost => 12,
            Self::EcdsaP256Sha256 => 13,
            Self::EcdsaP384Sha384 => 14,
            Self::Ed25519 => 15,
            Self::Ed448 => 16,
            Self::Unassigned(other) => other,
        }
    }

    /// The verifier table. `None` means signatures with this algorithm
    /// cannot be checked here.
    pub fn verifier(self) -> Option<Verifier> {
        match self {
            Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 => Some(Verifier::Rsa(
                &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY,
            )),
            Self::RsaSha256 => Some(Verifier::Rsa(
                &signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY,
            )),
            Self::RsaSha512 => Some(Verifier::Rsa(
                &signature::RSA_PKCS1_1024_8192_SHA512_FOR_LEGACY_USE_ONLY,
            )),
            Self::EcdsaP256Sha256 => Some(Verifier::Ecdsa {
                algorithm: &signature::ECDSA_P256_SHA256_FIXED,
                coordinate_len: 32,
            }),
            Self::EcdsaP384Sha384 => Some(Verifier::Ecdsa {
                algorithm: &signature::ECDSA_P384_SHA384_FIXED,
                coordinate_len: 48,
            }),
            Self::Ed25519 => Some(Verifier::Ed25519),
            _ => None,
        }
    }

    /// Check if algorithm is supported for validation
    pub fn is_supported(self) -> bool {
        self.verifier().is_some()
    }

    /// Check if algorithm is recommended for signing (RFC 8624)
    pub fn is_recommended(self) -> bool {
        matches!(
            self,
            Self::RsaSha256 | Self::EcdsaP256Sha256 | Self::Ed25519
        )
    }
}

impl fmt::Display for DnsSecAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaMd5 => write!(f, "RSAMD5"),
            Self::Dsa => write!(f, "DSA"),
            Self::RsaSha1 => write!(f, "RSASHA1"),
            Self::DsaNsec3Sha1 => write!(f, "DSA-NSEC3-SHA1"),
            Self::RsaSha1Nsec3Sha1 => write!(f, "RSASHA1-NSEC3-SHA1"),
            Self::RsaSha256 => write!(f, "RSASHA256"),
            Self::RsaSha512 => write!(f, "RSASHA512"),
            Self::EccGost => write!(f, "ECC-GOST"),
            Self::EcdsaP256Sha256 => write!(f, "ECDSAP256SHA256"),
            Self::EcdsaP384Sha384 => write!(f, "ECDSAP384SHA384"),
            Self::Ed25519 => write!(f, "ED25519"),
            Self::Ed448 => write!(f, "ED448"),
            Self::Unassigned(n) => write!(f, "ALG{}", n),
        }
    }
}
