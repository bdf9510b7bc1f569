use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub const HEALTH_PATH: &str = "/health";

#[derive(Parser, Debug)]
#[command(name = "tzwebhook", version, about = "Timezone injection admission webhook")]
pub struct Cli {
    /// PEM certificate presented to the API server, re-read on every handshake
    #[arg(long, env = "TZWEBHOOK_TLS_CERT_FILE", default_value = "/run/secrets/tls/tls.crt")]
    pub tls_cert_file: PathBuf,

    /// PEM private key matching the certificate
    #[arg(long, env = "TZWEBHOOK_TLS_KEY_FILE", default_value = "/run/secrets/tls/tls.key")]
    pub tls_key_file: PathBuf,

    #[arg(long, env = "TZWEBHOOK_ADDRESS", default_value = "0.0.0.0:8443")]
    pub address: SocketAddr,

    /// Path the admission webhook is served on
    #[arg(long, env = "TZWEBHOOK_PATH", default_value = "/")]
    pub webhook_path: String,

    /// Log the resolved configuration and per-request details
    #[arg(short, long, env = "TZWEBHOOK_VERBOSE")]
    pub verbose: bool,

    /// Kubeconfig to use instead of the in-cluster configuration
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Timezone injected when no annotation names one
    #[arg(long, env = "TZWEBHOOK_TIMEZONE", default_value = "UTC")]
    pub timezone: String,

    /// Inject unless an annotation says otherwise
    #[arg(long, env = "TZWEBHOOK_INJECT", default_value_t = true, action = ArgAction::Set)]
    pub inject: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub tls_cert_file: PathBuf,
    pub tls_key_file: PathBuf,
    pub address: SocketAddr,
    pub webhook_path: String,
    pub verbose: bool,
    pub kubeconfig: Option<PathBuf>,
    pub timezone: String,
    pub inject: bool,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if !cli.webhook_path.starts_with('/') {
            return Err(ConfigError::RelativeWebhookPath(cli.webhook_path));
        }
        if cli.webhook_path == HEALTH_PATH {
            return Err(ConfigError::WebhookPathTaken(cli.webhook_path));
        }
        if cli.timezone.is_empty() || cli.timezone.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidTimezone(cli.timezone));
        }

        Ok(ServerConfig {
            tls_cert_file: cli.tls_cert_file,
            tls_key_file: cli.tls_key_file,
            address: cli.address,
            webhook_path: cli.webhook_path,
            verbose: cli.verbose,
            kubeconfig: cli.kubeconfig,
            timezone: cli.timezone,
            inject: cli.inject,
        })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Webhook path `{0}` must start with `/`.")]
    RelativeWebhookPath(String),
    #[error("Webhook path `{0}` is reserved for the health endpoint.")]
    WebhookPathTaken(String),
    #[error("Invalid timezone `{0}`.")]
    InvalidTimezone(String),
}
