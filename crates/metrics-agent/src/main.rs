// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use metrics_agent::agent::Agent;
use metrics_agent::config;
use metrics_core::build_info;
use metrics_core::config::LogLevel;
use metrics_core::logger;
use std::process;
use tracing::{debug, error, info};

const LOG_PREFIX: &str = "METRICS_AGENT";

#[tokio::main]
pub async fn main() {
    println!("Build version: {}", build_info::VERSION);
    println!("Build date: {}", build_info::date());
    println!("Build commit: {}", build_info::commit());

    let config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            if logger::init(LOG_PREFIX, LogLevel::Error).is_ok() {
                error!("Failed to load configuration: {e}");
            }
            process::exit(1);
        }
    };

    if let Err(e) = logger::init(LOG_PREFIX, config.log_level) {
        eprintln!("{e}");
    }
    debug!("Logging subsystem enabled");

    let mut agent = match Agent::new(config).await {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to initialize agent: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = agent.start() {
        error!("Failed to start agent: {e}");
        process::exit(1);
    }

    let reason = agent.wait_for_shutdown().await;
    info!("Shutting down: {reason:?}");

    if let Err(e) = agent.shutdown().await {
        error!("Fatal: {e}");
        process::exit(1);
    }
}
