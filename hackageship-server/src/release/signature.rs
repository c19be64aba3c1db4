use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    fn prefix(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1=",
            SignatureAlgorithm::Sha256 => "sha256=",
        }
    }
}

/// The signature GitHub attached to a delivery, still hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSignature {
    pub algorithm: SignatureAlgorithm,
    pub hex_digest: String,
}

impl HookSignature {
    pub fn new(algorithm: SignatureAlgorithm, value: &str) -> Self {
        let value = value.trim();
        let hex_digest = value.strip_prefix(algorithm.prefix()).unwrap_or(value);
        Self {
            algorithm,
            hex_digest: hex_digest.to_owned(),
        }
    }

    /// Picks the `X-Hub-Signature-256` header when GitHub sent one, and falls
    /// back to the SHA-1 `X-Hub-Signature` header otherwise.
    pub fn from_headers(sha256: Option<&str>, sha1: Option<&str>) -> Option<Self> {
        match (sha256, sha1) {
            (Some(value), _) => Some(Self::new(SignatureAlgorithm::Sha256, value)),
            (None, Some(value)) => Some(Self::new(SignatureAlgorithm::Sha1, value)),
            (None, None) => None,
        }
    }
}

/// True when `signature` is the HMAC of `body` keyed with `secret`. The
/// digest comparison is constant time, and a signature that is not valid
/// hex simply fails to verify.
pub fn verify_signature(body: &[u8], signature: &HookSignature, secret: &[u8]) -> bool {
    let expected = match hex::decode(&signature.hex_digest) {
        Ok(expected) => expected,
        Err(_) => return false,
    };

    match signature.algorithm {
        SignatureAlgorithm::Sha1 => match Hmac::<Sha1>::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(body);
                mac.verify_slice(&expected).is_ok()
            }
            Err(_) => false,
        },
        SignatureAlgorithm::Sha256 => match Hmac::<Sha256>::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(body);
                mac.verify_slice(&expected).is_ok()
            }
            Err(_) => false,
        },
    }
}
