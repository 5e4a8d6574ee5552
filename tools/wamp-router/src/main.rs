//! WAMP Router Server
//!
//! A standalone WAMP v2 router serving the `wamp.2.json` WebSocket
//! subprotocol. Settings come from an optional TOML file; `--host`,
//! `--port` and `--path` override it.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wamp_core::{CodecConfig, UriMatchingRule, DEFAULT_PATH, DEFAULT_PORT};
use wamp_router::{RealmConfig, Router, RouterConfig, RouterError};
use wamp_transport::WebSocketConfig;

#[derive(Parser)]
#[command(name = "wamp-router")]
#[command(about = "WAMP v2 Router Server")]
#[command(version)]
struct Cli {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// WebSocket path
    #[arg(long)]
    path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Options recognized in the config file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct ServerConfig {
    host: String,
    port: u16,
    path: String,
    auto_create_realms: bool,
    uri_matching_rule: UriMatchingRule,
    dict_key_matching_rules: Option<Vec<String>>,
    shutdown_timeout_ms: u64,
    realms: Vec<RealmConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let router = RouterConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            auto_create_realms: router.auto_create_realms,
            uri_matching_rule: router.codec.uri_rule,
            dict_key_matching_rules: None,
            shutdown_timeout_ms: router.shutdown_timeout.as_millis() as u64,
            realms: Vec::new(),
        }
    }
}

impl ServerConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(path) = &cli.path {
            self.path = path.clone();
        }
    }

    fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn websocket(&self) -> WebSocketConfig {
        WebSocketConfig {
            path: self.path.clone(),
            ..Default::default()
        }
    }

    fn router(&self) -> RouterConfig {
        let defaults = CodecConfig::default();
        RouterConfig {
            auto_create_realms: self.auto_create_realms,
            codec: CodecConfig {
                uri_rule: self.uri_matching_rule,
                dict_key_rules: self
                    .dict_key_matching_rules
                    .clone()
                    .unwrap_or(defaults.dict_key_rules),
            },
            realms: self.realms.clone(),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    config.apply(&cli);

    let router = Router::new(config.router())?;
    tracing::info!("Starting WAMP router");

    let serving = router.clone();
    let addr = config.listen_addr();
    let websocket = config.websocket();
    let mut server =
        tokio::spawn(async move { serving.serve_websocket(&addr, websocket).await });

    // Run until interrupted or the listener fails
    tokio::select! {
        served = &mut server => {
            served.context("router task panicked")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            tracing::info!("Interrupted");
        }
    }

    match router.shutdown().await {
        Ok(()) => tracing::info!("All sessions closed"),
        Err(RouterError::ShutdownTimeout(limit)) => {
            tracing::warn!("Sessions still open after {:?}; exiting anyway", limit)
        }
        Err(e) => return Err(e.into()),
    }

    server.await.context("router task panicked")??;
    Ok(())
}
