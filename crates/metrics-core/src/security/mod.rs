// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payload protection shared by the agent and the server.
//!
//! The agent runs the forward direction in [`pipeline::SecurityPipeline`]:
//!
//! ```text
//! JSON -> [ECIES encrypt] -> gzip            (wire body)
//!              `-> [HMAC-SHA256, hex]         (HashSHA256 header)
//! ```
//!
//! The HMAC covers the bytes after encryption and before compression. The
//! server undoes the steps one middleware at a time using the primitives in
//! [`compression`], [`hash`] and [`crypto`].

pub mod compression;
pub mod crypto;
pub mod hash;
pub mod pipeline;

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to compress payload: {0}")]
    Compress(#[source] io::Error),
    #[error("failed to decompress payload: {0}")]
    Decompress(#[source] io::Error),
    #[error("decompressed payload exceeds {0} bytes")]
    TooLarge(usize),
    #[error("failed to encrypt payload: {0}")]
    Encrypt(String),
    #[error("failed to decrypt payload: {0}")]
    Decrypt(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("failed to read key file {}: {source}", path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("hashes do not match")]
    HashMismatch,
}

pub use crypto::{generate_keypair, DecryptionKey, EncryptionKey};
pub use hash::{Signer, HASH_HEADER};
pub use pipeline::{SealedPayload, SecurityPipeline};
