use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::dispatcher::{DispatcherConfig, DEFAULT_USER_AGENT};
use crate::insights::DealRecord;
use crate::signing::DEFAULT_SIGNATURE_HEADER;
use crate::types::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Command line and environment configuration for the relay server.
#[derive(Debug, Clone, Parser)]
#[command(name = "webhook-relay", version, about = "Signed webhook fan-out with delivery logs")]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    #[arg(long, env = "RELAY_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// JSON array of subscriptions used to seed the in-memory registry.
    #[arg(long, env = "RELAY_SUBSCRIPTIONS_FILE")]
    pub subscriptions_file: Option<PathBuf>,

    /// JSON array of deal records for the in-memory insight source.
    #[arg(long, env = "RELAY_DEALS_FILE")]
    pub deals_file: Option<PathBuf>,

    #[arg(long, env = "RELAY_SIGNATURE_HEADER", default_value = DEFAULT_SIGNATURE_HEADER)]
    pub signature_header: String,

    #[arg(long, env = "RELAY_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    #[arg(long, env = "RELAY_REQUEST_TIMEOUT_SECS", default_value_t = 5)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "RELAY_MAX_IN_FLIGHT", default_value_t = 100)]
    pub max_in_flight: usize,

    /// Bytes of each subscriber reply kept in the delivery log.
    #[arg(long, env = "RELAY_MAX_RESPONSE_BYTES", default_value_t = 64 * 1024)]
    pub max_response_bytes: usize,

    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// PostgreSQL connection string; replaces the in-memory stores.
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Redis URL; replaces the in-memory registry and delivery log.
    #[cfg(feature = "redis")]
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,
}

impl ServerConfig {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            signature_header: self.signature_header.clone(),
            user_agent: self.user_agent.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_in_flight: self.max_in_flight.max(1),
            max_response_bytes: self.max_response_bytes,
        }
    }
}

/// Read a JSON array of subscriptions.
pub fn load_subscriptions(path: &Path) -> anyhow::Result<Vec<Subscription>> {
    load_json_array(path)
}

/// Read a JSON array of deal records.
pub fn load_deals(path: &Path) -> anyhow::Result<Vec<DealRecord>> {
    load_json_array(path)
}

fn load_json_array<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
