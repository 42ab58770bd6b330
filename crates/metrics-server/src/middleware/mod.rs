// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request pipeline for the update routes, outermost first:
//!
//! ```text
//! trusted subnet -> gunzip -> verify HashSHA256 -> decrypt -> handler
//! ```
//!
//! Each step is an `axum::middleware::from_fn` function; the ones that need
//! key material share one [`SecurityState`].

pub mod compression;
pub mod decrypt;
pub mod hash;
pub mod logging;
pub mod trusted_subnet;

use ipnet::IpNet;
use metrics_core::security::{DecryptionKey, Signer};

pub use compression::decompress_request;
pub use decrypt::decrypt_body;
pub use hash::verify_hash;
pub use logging::log_request;
pub use trusted_subnet::check_trusted_subnet;

#[derive(Default)]
pub struct SecurityState {
    pub signer: Option<Signer>,
    pub decryption_key: Option<DecryptionKey>,
    pub trusted_subnet: Option<IpNet>,
}
