// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use metrics_core::build_info;
use metrics_core::config::LogLevel;
use metrics_core::logger;
use metrics_server::config;
use metrics_server::server::Server;
use std::process;
use tracing::{debug, error};

const LOG_PREFIX: &str = "METRICS_SERVER";

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

    let server = match Server::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to initialize server: {e}");
            process::exit(1);
        }
    };
    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = server.run(listener).await {
        error!("Fatal: {e}");
        process::exit(1);
    }
}
