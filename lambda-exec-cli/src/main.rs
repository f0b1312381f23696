// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! lambda-container-exec
//!
//! Custom runtime `bootstrap` that pulls a function package from S3 on
//! every invocation, unpacks it and runs the package's own `bootstrap`.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lambda_exec_core::{ConfigError, ConfigLoader, ExecConfig, LogLevel, Orchestrator, S3Store};

mod runtime;

use runtime::RuntimeClient;

/// lambda-container-exec - run a function package fetched from S3
#[derive(Parser)]
#[command(name = "lambda-container-exec")]
#[command(author, version, about, long_about = None)]
pub struct Cli {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Cli::parse();

    let loaded = ConfigLoader::from_env();

    // Initialize logging; a rejected configuration still logs at the default level
    init_logging(log_level_of(&loaded));

    let client = RuntimeClient::from_env()?;

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(stage = "config", error = %e, "Invalid configuration");
            if let Err(report) = client.send_init_error(&e).await {
                tracing::warn!(error = %report, "Failed to report init error");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        source = %config.source,
        code_dir = %config.code_dir.display(),
        mode = %config.mode,
        "Runtime started"
    );

    let orchestrator = Orchestrator::new(config, S3Store::new());

    loop {
        let invocation = client.next_invocation().await?;
        let request_id = invocation.context.request_id.clone();

        match orchestrator
            .handle(&invocation.event, &invocation.context)
            .await
        {
            Ok(output) => client.send_response(&request_id, output).await?,
            Err(e) => client.send_error(&request_id, &e).await?,
        }
    }
}

fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(level.directive()))
        .init();
}

fn log_level_of(loaded: &Result<ExecConfig, ConfigError>) -> LogLevel {
    loaded
        .as_ref()
        .map(|config| config.log_level)
        .unwrap_or_default()
}
