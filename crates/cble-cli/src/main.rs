// ABOUTME: Entry point for the cble command-line interface.
// ABOUTME: Dispatches to the serve, handshake, provider, and version subcommands.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use cble_broker::{AllocationKind, BrokerClient, BrokerConfig};
use cble_grpc::{
    cancel_on_signal, CancellationToken, ChannelConfig, ClientTlsOptions, DEFAULT_PORT,
    PROTOCOL_VERSION,
};
use cble_provider::{DefaultProvider, ProviderRuntime};

#[derive(Parser)]
#[command(name = "cble")]
#[command(about = "Provider registration broker for cble")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker until interrupted
    Serve {
        /// Path to configuration file (defaults to ~/.config/cble/broker.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host to listen on
        #[arg(long, env = "CBLE_HOST")]
        host: Option<String>,

        /// TCP port to listen on
        #[arg(long, short, env = "CBLE_PORT")]
        port: Option<u16>,

        /// Listen on a local socket instead of TCP
        #[arg(long, conflicts_with = "host")]
        socket: Option<PathBuf>,

        /// Serve over TLS
        #[arg(long)]
        tls: bool,

        /// Server certificate (PEM)
        #[arg(long)]
        cert: Option<PathBuf>,

        /// Server private key (PEM)
        #[arg(long)]
        key: Option<PathBuf>,

        /// Kind of endpoint handed to providers
        #[arg(long, value_enum)]
        allocation: Option<Allocation>,

        /// Fixed seed for endpoint allocation
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Connect to a broker and report its version
    Handshake {
        #[command(flatten)]
        target: BrokerTarget,
    },

    /// Register a handshake-only provider and serve it until interrupted
    Provider {
        #[command(flatten)]
        target: BrokerTarget,

        /// Provider name
        #[arg(long, default_value = "cble-smoke")]
        name: String,

        /// Provider version
        #[arg(long, default_value = PROTOCOL_VERSION)]
        provider_version: String,

        /// Registration identity (auto-generated if not provided)
        #[arg(long)]
        id: Option<String>,

        /// Declared capability, may be repeated
        #[arg(long = "feature")]
        features: Vec<String>,
    },

    /// Show version information
    Version,
}

/// How to reach a broker.
#[derive(Args, Debug)]
struct BrokerTarget {
    /// Broker address (host:port)
    #[arg(long, short, env = "CBLE_BROKER")]
    address: Option<String>,

    /// Broker local socket
    #[arg(long, conflicts_with = "address")]
    socket: Option<PathBuf>,

    /// Connect over TLS
    #[arg(long)]
    tls: bool,

    /// CA certificate used to verify the broker (PEM)
    #[arg(long)]
    ca: Option<PathBuf>,
}

impl BrokerTarget {
    fn channel_config(&self) -> ChannelConfig {
        let config = match (&self.socket, &self.address) {
            (Some(path), _) => ChannelConfig::unix(path),
            (None, Some(address)) => ChannelConfig::tcp(address.clone()),
            (None, None) => ChannelConfig::tcp(format!("localhost:{}", DEFAULT_PORT)),
        };
        config.with_tls(ClientTlsOptions {
            enabled: self.tls,
            ca_file: self.ca.clone(),
            domain_name: None,
        })
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Allocation {
    Port,
    Socket,
}

impl From<Allocation> for AllocationKind {
    fn from(value: Allocation) -> Self {
        match value {
            Allocation::Port => AllocationKind::Port,
            Allocation::Socket => AllocationKind::Socket,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            socket,
            tls,
            cert,
            key,
            allocation,
            seed,
        } => {
            cble_log::init();
            let mut config = BrokerConfig::load_or_default(config.as_deref())?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if socket.is_some() {
                config.socket = socket;
            }
            if tls {
                config.tls.enabled = true;
            }
            if cert.is_some() {
                config.tls.cert_file = cert;
            }
            if key.is_some() {
                config.tls.key_file = key;
            }
            if let Some(allocation) = allocation {
                config.allocation = allocation.into();
            }
            if seed.is_some() {
                config.seed = seed;
            }
            run_serve(config).await
        }
        Commands::Handshake { target } => {
            cble_log::init();
            run_handshake(target).await
        }
        Commands::Provider {
            target,
            name,
            provider_version,
            id,
            features,
        } => {
            cble_log::init_for("cble-provider");
            run_provider(target, name, provider_version, id, features).await
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Run the broker until SIGINT or SIGTERM
async fn run_serve(config: BrokerConfig) -> Result<()> {
    let token = CancellationToken::new();
    let signals = cancel_on_signal(token.clone());

    let result = cble_broker::run(&config, token.clone()).await;
    token.cancel();
    let _ = signals.await;
    result
}

/// Connect, handshake, and print the broker's version
async fn run_handshake(target: BrokerTarget) -> Result<()> {
    let config = target.channel_config();
    let client = BrokerClient::connect(&config)
        .await
        .with_context(|| format!("connecting to broker at {:?}", config.target))?;
    println!("broker version: {}", client.server_version());
    println!("client version: {}", PROTOCOL_VERSION);
    Ok(())
}

/// Register a handshake-only provider and serve until interrupted
async fn run_provider(
    target: BrokerTarget,
    name: String,
    version: String,
    id: Option<String>,
    features: Vec<String>,
) -> Result<()> {
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let runtime =
        ProviderRuntime::new(name, version, id, target.channel_config()).with_features(features);

    let registered = runtime
        .register(DefaultProvider)
        .await
        .context("registering with broker")?;
    println!("Provider serving on {}", registered.endpoint());
    println!("Press Ctrl+C to stop");

    let token = CancellationToken::new();
    let signals = cancel_on_signal(token.clone());
    let result = registered.serve(token.clone()).await;
    token.cancel();
    let _ = signals.await;
    result.context("serving provider")?;
    Ok(())
}

fn print_version() {
    println!("cble {}", env!("CARGO_PKG_VERSION"));
    println!("protocol: {}", PROTOCOL_VERSION);
}
