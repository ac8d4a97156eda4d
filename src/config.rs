//! Configuration (`spec.md` §6): CLI surface generalizing the teacher's
//! `Command`-builder CLI (`main.rs`) to accept one or more references
//! instead of a single `repository`/`workflow` pair, using `clap`'s derive
//! API with `wrap_help` as the teacher's `Cargo.toml` already selects.

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gha-causal-trace", about = "Correlate GitHub Actions activity reachable from PRs or commits into an OpenTelemetry span tree")]
pub struct Cli {
    /// One or more references: a full URL, path, or owner/repo/(pull|commit)/id.
    /// Not required when `--webhook-addr` is set.
    pub references: Vec<String>,

    /// Bearer token. Falls back to GITHUB_TOKEN if unset.
    #[arg(long)]
    pub token: Option<String>,

    /// Only keep activity within this many seconds of the latest activity.
    #[arg(long)]
    pub window_secs: Option<u64>,

    /// Max parallel job fetches within a single Reference.
    #[arg(long, default_value_t = 4)]
    pub concurrency_per_ref: usize,

    /// Global ceiling on outgoing HTTP requests.
    #[arg(long, default_value_t = 8)]
    pub max_in_flight: usize,

    /// Per-attempt HTTP deadline, in seconds.
    #[arg(long, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Max retry attempts for transient failures.
    #[arg(long, default_value_t = 5)]
    pub retry_max: u32,

    /// Minimum remaining rate-limit quota before pre-emptively waiting.
    #[arg(long, default_value_t = 100)]
    pub rate_limit_buffer: u32,

    /// Shift fetched timestamps to just before "now", for manual testing
    /// against a live OTel backend. Kept from the teacher's `--devel` flag.
    #[arg(long)]
    pub devel: bool,

    /// Write a Markdown report to this path.
    #[arg(long)]
    pub markdown_out: Option<std::path::PathBuf>,

    /// Write a Perfetto JSON trace to this path.
    #[arg(long)]
    pub perfetto_out: Option<std::path::PathBuf>,

    /// Persist runs/jobs to this sqlite database.
    #[arg(long)]
    pub history_db: Option<String>,

    /// Print the nested tree view.
    #[arg(long)]
    pub tree: bool,

    /// Send spans over OTLP/gRPC to this endpoint.
    #[arg(long)]
    pub otlp_grpc_endpoint: Option<String>,

    /// Send spans over OTLP/HTTP to this endpoint.
    #[arg(long)]
    pub otlp_http_endpoint: Option<String>,

    /// Instead of a one-shot run, listen for workflow_run webhook events on
    /// this address and trigger ingestion per event.
    #[arg(long)]
    pub webhook_addr: Option<std::net::SocketAddr>,
}

/// Resolved run configuration, independent of how it was parsed.
#[derive(Debug, Clone)]
pub struct Config {
    pub window: Option<Duration>,
    pub concurrency_per_ref: usize,
    pub max_in_flight: usize,
    pub http_timeout: Duration,
    pub retry_max: u32,
    pub rate_limit_buffer: u32,
    pub devel: bool,
}

impl From<&Cli> for Config {
    fn from(cli: &Cli) -> Self {
        Self {
            window: cli.window_secs.map(Duration::from_secs),
            concurrency_per_ref: cli.concurrency_per_ref,
            max_in_flight: cli.max_in_flight,
            http_timeout: Duration::from_secs(cli.http_timeout_secs),
            retry_max: cli.retry_max,
            rate_limit_buffer: cli.rate_limit_buffer,
            devel: cli.devel,
        }
    }
}

/// Resolves the bearer token from `--token`, falling back to `GITHUB_TOKEN`,
/// per `SPEC_FULL.md` §10.3.
pub fn resolve_token(cli: &Cli) -> Result<String, anyhow::Error> {
    cli.token
        .clone()
        .or_else(|| std::env::var("GITHUB_TOKEN").ok())
        .ok_or_else(|| anyhow::anyhow!("no token: pass --token or set GITHUB_TOKEN"))
}
