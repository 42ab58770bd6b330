// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod logger;
pub mod metric;
pub mod retry;
pub mod security;

/// Build metadata logged by both binaries at startup.
pub mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    #[must_use]
    pub fn date() -> &'static str {
        option_env!("BUILD_DATE").unwrap_or("N/A")
    }

    #[must_use]
    pub fn commit() -> &'static str {
        option_env!("BUILD_COMMIT").unwrap_or("N/A")
    }
}
