// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::SecurityError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Request header carrying the hex-encoded HMAC of the payload.
pub const HASH_HEADER: &str = "HashSHA256";

/// HMAC-SHA256 keyed with the shared signing key.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// `None` for an empty key, which disables signing.
    pub fn from_optional(key: Option<&str>) -> Option<Self> {
        key.filter(|k| !k.is_empty()).map(Self::new)
    }

    fn mac(&self) -> Result<HmacSha256, SecurityError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| SecurityError::InvalidKey(e.to_string()))
    }

    pub fn sign(&self, data: &[u8]) -> Result<String, SecurityError> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time comparison against a hex digest.
    pub fn verify(&self, data: &[u8], digest: &str) -> Result<(), SecurityError> {
        let expected = hex::decode(digest.trim()).map_err(|_| SecurityError::HashMismatch)?;
        let mut mac = self.mac()?;
        mac.update(data);
        mac.verify_slice(&expected)
            .map_err(|_| SecurityError::HashMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        let signer = Signer::new("Jefe");
        assert_eq!(
            signer.sign(b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify() {
        let signer = Signer::new("secret");
        let digest = signer.sign(b"payload").unwrap();
        assert!(signer.verify(b"payload", &digest).is_ok());
        assert!(matches!(
            signer.verify(b"payloaD", &digest),
            Err(SecurityError::HashMismatch)
        ));
        assert!(matches!(
            Signer::new("other").verify(b"payload", &digest),
            Err(SecurityError::HashMismatch)
        ));
        assert!(signer.verify(b"payload", "not-hex").is_err());
    }

    #[test]
    fn test_empty_key_disables_signing() {
        assert!(Signer::from_optional(None).is_none());
        assert!(Signer::from_optional(Some("")).is_none());
        assert!(Signer::from_optional(Some("k")).is_some());
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", Signer::new("super-secret"));
        assert!(!debug.contains("super-secret"));
    }
}
