// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Elliptic-curve integrated encryption of whole payloads.
//!
//! Uses ECIES over secp256k1 (ECDH, HKDF-SHA256, AES-256-GCM). The
//! ciphertext is one opaque blob carrying the ephemeral public key, nonce,
//! tag and encrypted data.
//!
//! Key files contain the hex-encoded key. Public keys are 65 bytes
//! (uncompressed) or 33 bytes (compressed), secret keys are 32 bytes.

use super::SecurityError;
use std::fmt;
use std::fs;
use std::path::Path;

const SECRET_KEY_LEN: usize = 32;
const PUBLIC_KEY_LENS: [usize; 2] = [33, 65];

fn read_key_file(path: &Path) -> Result<String, SecurityError> {
    fs::read_to_string(path).map_err(|source| SecurityError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}

fn decode_hex(encoded: &str) -> Result<Vec<u8>, SecurityError> {
    hex::decode(encoded.trim()).map_err(|e| SecurityError::InvalidKey(e.to_string()))
}

/// Recipient public key, used by the agent.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncryptionKey")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl EncryptionKey {
    pub fn from_hex(encoded: &str) -> Result<Self, SecurityError> {
        let bytes = decode_hex(encoded)?;
        if !PUBLIC_KEY_LENS.contains(&bytes.len()) {
            return Err(SecurityError::InvalidKey(format!(
                "public key must be 33 or 65 bytes, got {}",
                bytes.len()
            )));
        }
        let key = Self(bytes);
        // parsing happens inside the scheme, surface a bad point at load time
        key.encrypt(&[])?;
        Ok(key)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SecurityError> {
        Self::from_hex(&read_key_file(path.as_ref())?)
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
        ecies::encrypt(&self.0, plaintext).map_err(|e| SecurityError::Encrypt(format!("{e:?}")))
    }
}

/// Recipient secret key, used by the server.
#[derive(Clone)]
pub struct DecryptionKey(Vec<u8>);

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionKey").finish_non_exhaustive()
    }
}

impl DecryptionKey {
    pub fn from_hex(encoded: &str) -> Result<Self, SecurityError> {
        let bytes = decode_hex(encoded)?;
        if bytes.len() != SECRET_KEY_LEN {
            return Err(SecurityError::InvalidKey(format!(
                "secret key must be {SECRET_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().all(|b| *b == 0) {
            return Err(SecurityError::InvalidKey("secret key is zero".to_string()));
        }
        Ok(Self(bytes))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SecurityError> {
        Self::from_hex(&read_key_file(path.as_ref())?)
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if ciphertext.is_empty() {
            return Err(SecurityError::Decrypt("empty ciphertext".to_string()));
        }
        ecies::decrypt(&self.0, ciphertext).map_err(|e| SecurityError::Decrypt(format!("{e:?}")))
    }
}

/// Fresh random key pair.
#[must_use]
pub fn generate_keypair() -> (DecryptionKey, EncryptionKey) {
    let (secret, public) = ecies::utils::generate_keypair();
    (
        DecryptionKey(secret.serialize().to_vec()),
        EncryptionKey(public.serialize().to_vec()),
    )
}
