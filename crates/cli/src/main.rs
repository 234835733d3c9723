//! portdial CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse arguments** with `clap` and load the [`DialerConfig`] from `--config` (if
//!    given), then apply environment overrides.
//! 2. **Wire observability**: `tracing-subscriber` with an `EnvFilter`
//!    (`RUST_LOG`, default `info`) and a JSON layer on stderr. When
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans are also exported through
//!    an OpenTelemetry OTLP exporter and flushed before exit.
//! 3. **Run a sub-command**:
//!    - `parse <address>` prints the canonical address and its parts as JSON.
//!    - `echo <address> <message>` dials an in-process echo target through
//!      the [`Dialer`] and prints the reply.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dialer::{Dialer, DialerConfig, LogicalAddress};
use loopback::{Echo, LoopbackTransport};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const ENVIRONMENT_HELP: &str = "\
Environment:
  RUST_LOG                       log filter (default: info)
  PORTDIAL_DIAL_TIMEOUT_SECS     dial timeout override, 0 disables it
  OTEL_EXPORTER_OTLP_ENDPOINT    export spans over OTLP when set";

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "portdial", version)]
#[command(about = "Dial ports inside remote targets over a multiplexed connection")]
#[command(after_help = ENVIRONMENT_HELP)]
struct Args {
    /// JSON file with dialer settings
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the canonical form of <scope>.<target>:<port> and its parts
    Parse { address: String },
    /// Dial an in-process echo target and print the reply
    Echo { address: String, message: String },
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

/// Installs the global subscriber. Returns the tracer provider when OTLP
/// export is enabled so it can be flushed on exit.
fn init_tracing() -> anyhow::Result<Option<TracerProvider>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr);

    let provider = match std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Some(_) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .build()
                .context("building the OTLP span exporter")?;
            Some(
                TracerProvider::builder()
                    .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                    .build(),
            )
        }
        None => None,
    };
    let otel_layer = provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer("portdial")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .context("installing the tracing subscriber")?;
    Ok(provider)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DialerConfig> {
    let config = match path {
        Some(path) => DialerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DialerConfig::default(),
    };
    config
        .with_env_overrides()
        .context("applying environment overrides")
}

fn describe(address: &str) -> anyhow::Result<serde_json::Value> {
    let parsed: LogicalAddress = address
        .parse()
        .with_context(|| format!("invalid address {address:?}"))?;
    Ok(serde_json::json!({
        "address": parsed.to_string(),
        "network": parsed.network(),
        "scope": parsed.scope().as_str(),
        "target": parsed.target().as_str(),
        "port": parsed.port().as_u32(),
    }))
}

async fn echo(config: DialerConfig, address: &str, message: &str) -> anyhow::Result<String> {
    let parsed: LogicalAddress = address
        .parse()
        .with_context(|| format!("invalid address {address:?}"))?;
    let transport = LoopbackTransport::builder().serve(&parsed, Echo).build();
    let dialer = Arc::new(Dialer::new(Arc::new(transport), config));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut conn = dialer
        .dial_address(&cancel, parsed)
        .await
        .context("dialing")?;
    conn.write_all(message.as_bytes())
        .await
        .context("sending the message")?;
    conn.shutdown().await.context("finishing the request")?;

    let mut reply = String::new();
    conn.read_to_string(&mut reply)
        .await
        .context("reading the reply")?;

    conn.close().await?;
    dialer.shutdown().await;
    Ok(reply)
}

async fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Parse { address } => {
            let description = describe(&address)?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Command::Echo { address, message } => {
            let config = load_config(args.config.as_ref())?;
            let reply = echo(config, &address, &message).await?;
            println!("{reply}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let provider = init_tracing()?;

    let result = run(args).await;
    if let Err(error) = &result {
        tracing::error!(error = format!("{error:#}"), "portdial failed");
    }

    if let Some(provider) = provider {
        if let Err(error) = provider.shutdown() {
            eprintln!("flushing traces failed: {error}");
        }
    }
    result
}
