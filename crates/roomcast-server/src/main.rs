//! Roomcast server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! roomcast-server --bind 0.0.0.0:4433
//!
//! # Gate /user and /staff behind a fixed token table
//! roomcast-server --gated-namespace /user --gated-namespace /staff \
//!     --token s3cret=alice --token hunter2=bob
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use roomcast_core::{AdmissionPolicy, Authenticator, DisconnectPolicy, StaticTokens, TokenIdentity};
use roomcast_server::{DriverConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Roomcast chat router
#[derive(Parser, Debug)]
#[command(name = "roomcast-server")]
#[command(about = "Real-time chat router with global broadcast and rooms")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Frames queued per connection before deliveries to it are dropped
    #[arg(long, default_value = "256")]
    outbound_buffer: usize,

    /// Milliseconds the authenticator may take before admission is refused
    #[arg(long, default_value = "5000")]
    admission_timeout_ms: u64,

    /// Namespace that requires a token (repeatable)
    #[arg(long = "gated-namespace", default_value = AdmissionPolicy::DEFAULT_GATED_NAMESPACE)]
    gated_namespaces: Vec<String>,

    /// Accepted token as TOKEN=IDENTITY (repeatable). Without any, a token is
    /// taken as the identity it names.
    #[arg(long = "token", value_parser = parse_token)]
    tokens: Vec<(String, String)>,

    /// Do not tell room members when someone disconnects without leaving
    #[arg(long)]
    silent_disconnects: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_token(entry: &str) -> Result<(String, String), String> {
    StaticTokens::parse_entry(entry)
        .ok_or_else(|| format!("expected TOKEN=IDENTITY, got '{entry}'"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(bind = %args.bind, "roomcast server starting");

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided, using self-signed certificate");
    }

    let authenticator: Arc<dyn Authenticator> = if args.tokens.is_empty() {
        Arc::new(TokenIdentity)
    } else {
        tracing::info!(tokens = args.tokens.len(), "using static token table");
        Arc::new(args.tokens.into_iter().collect::<StaticTokens>())
    };

    let disconnect_policy = if args.silent_disconnects {
        DisconnectPolicy::Silent
    } else {
        DisconnectPolicy::Announce
    };

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        outbound_buffer: args.outbound_buffer,
        admission_timeout: Duration::from_millis(args.admission_timeout_ms),
        driver: DriverConfig {
            max_connections: args.max_connections,
            admission: AdmissionPolicy::gated(args.gated_namespaces),
            disconnect_policy,
            ..Default::default()
        },
        ..Default::default()
    };

    let server = Server::bind(config)?.with_authenticator(authenticator);

    tracing::info!(addr = %server.local_addr()?, "listening");

    server.run().await?;

    Ok(())
}
