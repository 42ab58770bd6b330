// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::compression::gzip;
use super::{EncryptionKey, SecurityError, Signer};
use serde::Serialize;

/// Wire-ready request body plus the optional integrity header value.
#[derive(Debug, Clone)]
pub struct SealedPayload {
    /// Gzip-compressed, possibly encrypted, JSON.
    pub body: Vec<u8>,
    /// Hex HMAC over the pre-compression bytes.
    pub signature: Option<String>,
}

/// Forward direction of the payload protection: encode, encrypt, compress, sign.
#[derive(Debug, Clone, Default)]
pub struct SecurityPipeline {
    signer: Option<Signer>,
    encryption_key: Option<EncryptionKey>,
}

impl SecurityPipeline {
    #[must_use]
    pub fn new(signer: Option<Signer>, encryption_key: Option<EncryptionKey>) -> Self {
        Self {
            signer,
            encryption_key,
        }
    }

    #[must_use]
    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    #[must_use]
    pub fn is_encrypting(&self) -> bool {
        self.encryption_key.is_some()
    }

    pub fn seal<T: Serialize + ?Sized>(&self, payload: &T) -> Result<SealedPayload, SecurityError> {
        let encoded = serde_json::to_vec(payload)?;

        let protected = match &self.encryption_key {
            Some(key) => key.encrypt(&encoded)?,
            None => encoded,
        };

        // signed before compression, gzip output is not byte-stable
        let signature = self
            .signer
            .as_ref()
            .map(|signer| signer.sign(&protected))
            .transpose()?;

        Ok(SealedPayload {
            body: gzip(&protected)?,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Metric;
    use crate::security::compression::gunzip;
    use crate::security::generate_keypair;

    fn batch() -> Vec<Metric> {
        vec![Metric::gauge("Alloc", 128.0), Metric::counter("PollCount", 1)]
    }

    #[test]
    fn test_plain_pipeline_only_compresses() {
        let sealed = SecurityPipeline::default().seal(&batch()).unwrap();
        assert!(sealed.signature.is_none());
        assert_eq!(
            gunzip(&sealed.body, 1 << 20).unwrap(),
            serde_json::to_vec(&batch()).unwrap()
        );
    }

    #[test]
    fn test_signature_covers_uncompressed_plaintext() {
        let signer = Signer::new("key");
        let sealed = SecurityPipeline::new(Some(signer.clone()), None)
            .seal(&batch())
            .unwrap();

        let plain = gunzip(&sealed.body, 1 << 20).unwrap();
        let signature = sealed.signature.unwrap();
        assert!(signer.verify(&plain, &signature).is_ok());
        assert!(signer.verify(&sealed.body, &signature).is_err());
    }

    #[test]
    fn test_full_round_trip() {
        let (secret, public) = generate_keypair();
        let signer = Signer::new("key");
        let pipeline = SecurityPipeline::new(Some(signer.clone()), Some(public));
        assert!(pipeline.is_signing() && pipeline.is_encrypting());

        let sealed = pipeline.seal(&batch()).unwrap();

        let ciphertext = gunzip(&sealed.body, 1 << 20).unwrap();
        signer
            .verify(&ciphertext, sealed.signature.as_deref().unwrap())
            .unwrap();
        let plaintext = secret.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, serde_json::to_vec(&batch()).unwrap());
    }

    #[test]
    fn test_tampered_ciphertext_fails_verification() {
        let (_, public) = generate_keypair();
        let signer = Signer::new("key");
        let sealed = SecurityPipeline::new(Some(signer.clone()), Some(public))
            .seal(&batch())
            .unwrap();

        let mut ciphertext = gunzip(&sealed.body, 1 << 20).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(matches!(
            signer.verify(&ciphertext, sealed.signature.as_deref().unwrap()),
            Err(SecurityError::HashMismatch)
        ));
    }
}
