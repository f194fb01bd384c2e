// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs::OpenOptions;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use slog::info;

use proxy_types::ProxyConfig;
use runtime_proxy::cri::server::CriServer;

#[derive(Debug, Parser)]
#[clap(name = "runtime-proxy", version, about = "Transparent CRI proxy with hook plugins")]
struct CommandLineOptions {
    #[clap(short, long, help = "Path to the TOML configuration file")]
    config: Option<String>,

    #[clap(long, help = "Unix socket path the proxy listens on")]
    listen: Option<String>,

    #[clap(long, help = "Unix socket path of the backend runtime service")]
    runtime_endpoint: Option<String>,

    #[clap(
        long,
        help = "Unix socket path of the backend image service (defaults to the runtime endpoint)"
    )]
    image_endpoint: Option<String>,

    #[clap(long, default_value_t = String::from("info"), help = "Log level: trace, debug, info, warn, error, critical")]
    log_level: String,

    #[clap(long, help = "Append JSON logs to this file instead of the terminal")]
    log_path: Option<String>,
}

fn load_config(options: &CommandLineOptions) -> Result<ProxyConfig> {
    let mut config = match &options.config {
        Some(path) => ProxyConfig::load_from_file(path)?,
        None => ProxyConfig::default(),
    };
    // flags win over the file
    if let Some(listen) = &options.listen {
        config.listen = listen.clone();
    }
    if let Some(runtime_endpoint) = &options.runtime_endpoint {
        config.runtime_endpoint = runtime_endpoint.clone();
    }
    if let Some(image_endpoint) = &options.image_endpoint {
        config.image_endpoint = image_endpoint.clone();
    }
    Ok(config)
}

async fn run(options: CommandLineOptions) -> Result<()> {
    let config = load_config(&options)?;

    let level = logging::level_name_to_slog_level(&options.log_level).map_err(|e| anyhow!(e))?;
    let (logger, _async_guard) = match &options.log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path))?;
            logging::create_logger("runtime-proxy", level, file)
        }
        None => logging::create_term_logger(level),
    };
    let _guard = slog_scope::set_global_logger(logger);

    info!(
        slog_scope::logger(),
        "starting runtime proxy";
        "listen" => config.listen.as_str(),
        "runtime_endpoint" => config.runtime_endpoint.as_str(),
        "image_endpoint" => config.image_endpoint(),
        "plugins" => config.plugins.len()
    );

    let server = CriServer::new(config).await?;
    server.serve().await
}

#[tokio::main]
async fn main() {
    let options = CommandLineOptions::parse();
    if let Err(e) = run(options).await {
        eprintln!("runtime-proxy: {:?}", e);
        std::process::exit(1);
    }
}
