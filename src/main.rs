//! fog: composes proxies the way functions compose, f∘g(x) = f(g(x)).
//!
//! ```text
//!                 ┌──────────────────────────── fog ─────────────────────────────┐
//!  client ──────▶ │ listener → auth → chain builder ─▶ agent₀ ─▶ … ─▶ agentₙ ─────┼──▶ target
//!  (HTTP/CONNECT) │                   (http | scifin | millimol | ws per hop)    │
//!                 └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The same binary also runs the server side of each tunnel protocol
//! (`fog scifin`, `fog millimol`, `fog ws`) so chains can end at a fog node.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use fog::config::{read_config, validate_config, ConfigError, ProxyConfig, ServerKind, TlsConfig};
use fog::lifecycle::startup;
use fog::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "fog", version, about = "Composable proxy-chaining gateway")]
struct Cli {
    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Port to listen on.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Configuration file: TOML, or a JSON array of hops.
    #[arg(short, long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Worker threads.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Credential clients must send in `Proxy-Authorization`.
    #[arg(short, long, env = "AUTH", hide_env_values = true)]
    auth: Option<String>,

    /// Skip certificate verification for TLS hops.
    #[arg(short, long = "loose-tls")]
    loose_tls: bool,

    /// PEM certificate for serving over TLS.
    #[arg(short = 'C', long = "https-cert", env = "HTTPS_CERT", requires = "https_key")]
    https_cert: Option<PathBuf>,

    /// PEM private key for serving over TLS.
    #[arg(short = 'k', long = "https-key", env = "HTTPS_KEY", requires = "https_cert")]
    https_key: Option<PathBuf>,

    /// Server to run.
    #[arg(value_enum)]
    server: Option<ServerKind>,
}

impl Cli {
    /// Layer command-line values over the file configuration.
    fn apply(self, config: &mut ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(port) = self.port {
            let mut addr: SocketAddr = config.listener.bind_address.parse()?;
            addr.set_port(port);
            config.listener.bind_address = addr.to_string();
        }
        if let Some(threads) = self.threads {
            config.workers = threads;
        }
        if let Some(auth) = self.auth {
            config.auth = auth;
        }
        if self.loose_tls {
            config.loose_tls = true;
        }
        if let (Some(cert), Some(key)) = (self.https_cert, self.https_key) {
            config.listener.tls = Some(TlsConfig {
                cert_path: cert.to_string_lossy().into_owned(),
                key_path: key.to_string_lossy().into_owned(),
            });
        }
        if let Some(server) = self.server {
            config.server = server;
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    let verbose = cli.verbose;
    cli.apply(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(logging::level_for_verbosity(&config.observability.log_level, verbose));
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server,
        bind_address = %config.listener.bind_address,
        workers = config.workers,
        hops = config.hops.len(),
        "fog starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;
    runtime.block_on(startup::run(config))?;

    tracing::info!("Shutdown complete");
    Ok(())
}
