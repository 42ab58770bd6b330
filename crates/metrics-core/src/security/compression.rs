// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::SecurityError;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

pub const GZIP: &str = "gzip";

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(SecurityError::Compress)?;
    encoder.finish().map_err(SecurityError::Compress)
}

/// Fails with [`SecurityError::TooLarge`] once the output passes `max_len`
/// bytes, without inflating the rest.
pub fn gunzip(data: &[u8], max_len: usize) -> Result<Vec<u8>, SecurityError> {
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let mut decoder = GzDecoder::new(data).take(limit);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(SecurityError::Decompress)?;
    if decompressed.len() > max_len {
        return Err(SecurityError::TooLarge(max_len));
    }
    Ok(decompressed)
}
