use std::sync::Arc;

use clap::Parser;
use gha_causal_trace::config::{self, Cli, Config};
use gha_causal_trace::github::client::{Client, ClientConfig};
use gha_causal_trace::pipeline::Pipeline;
use gha_causal_trace::planner::{self, PlannerConfig, ReferenceOutcome};
use gha_causal_trace::progress::TracingProgress;
use gha_causal_trace::reference;
use gha_causal_trace::sinks::{history::HistorySink, markdown::MarkdownSink, otlp::{OtlpSink, Transport}, perfetto::PerfettoSink, terminal::TerminalSink, tree::TreeSink};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let token = config::resolve_token(&cli)?;
    let config = Config::from(&cli);

    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancellation.cancel();
        });
    }

    let client_config = ClientConfig {
        token,
        max_in_flight: config.max_in_flight,
        http_timeout: config.http_timeout,
        retry_max: config.retry_max,
        rate_limit_buffer: config.rate_limit_buffer,
    };
    let client = Arc::new(Client::new(client_config, cancellation.clone())?);

    let pipeline = Arc::new(Pipeline::new());
    register_sinks(&cli, &pipeline).await?;

    let planner_config = PlannerConfig { concurrency_per_ref: config.concurrency_per_ref, window: config.window, devel: config.devel };

    let exit_code = if let Some(addr) = cli.webhook_addr {
        run_webhook_mode(addr, client, planner_config, Arc::clone(&pipeline), cancellation).await?;
        0
    } else {
        if cli.references.is_empty() {
            error!("no references given and --webhook-addr not set");
            std::process::exit(2);
        }
        run_one_shot(&cli.references, client, planner_config, Arc::clone(&pipeline), cancellation).await
    };

    if let Err(sink_error) = pipeline.finish().await {
        error!(%sink_error, "sink finish failed");
        std::process::exit(1);
    }

    std::process::exit(exit_code);
}

async fn run_one_shot(
    inputs: &[String],
    client: Arc<Client>,
    planner_config: PlannerConfig,
    pipeline: Arc<Pipeline>,
    cancellation: CancellationToken,
) -> i32 {
    let references = match reference::parse_references(inputs) {
        Ok(references) => references,
        Err(error) => {
            error!(%error, "invalid reference");
            return 2;
        }
    };

    let progress = Arc::new(TracingProgress::new());
    let outcomes = planner::run(client, references, planner_config, progress, cancellation).await;

    let mut exit_code = 0;
    for outcome in &outcomes {
        exit_code = exit_code.max(dispatch_outcome(outcome, &pipeline).await);
    }
    exit_code
}

async fn dispatch_outcome(outcome: &ReferenceOutcome, pipeline: &Pipeline) -> i32 {
    if let Some(ingest_error) = &outcome.error {
        error!(reference = %outcome.reference.display_url, %ingest_error, "reference failed");
        return if ingest_error.is_exit_zero() { 0 } else { 1 };
    }

    if let Err(sink_error) = pipeline.process(&outcome.spans).await {
        error!(%sink_error, "sink export failed");
    }
    0
}

/// Webhook mode (`SPEC_FULL.md` §11): each inbound `workflow_run` event is
/// turned into a single commit Reference and run through the same Planner
/// and Pipeline as the one-shot CLI path.
async fn run_webhook_mode(
    addr: std::net::SocketAddr,
    client: Arc<Client>,
    planner_config: PlannerConfig,
    pipeline: Arc<Pipeline>,
    cancellation: CancellationToken,
) -> anyhow::Result<()> {
    let (trigger, mut receiver) = tokio::sync::mpsc::channel::<String>(64);

    let server_cancellation = cancellation.clone();
    let server = tokio::spawn(async move {
        tokio::select! {
            result = gha_causal_trace::webhook::serve(addr, trigger) => {
                if let Err(error) = result {
                    error!(%error, "webhook server exited");
                }
            }
            _ = server_cancellation.cancelled() => {}
        }
    });

    while let Some(input) = receiver.recv().await {
        if cancellation.is_cancelled() {
            break;
        }
        info!(input, "webhook-triggered reference");
        let exit_code = run_one_shot(&[input], Arc::clone(&client), planner_config.clone(), Arc::clone(&pipeline), cancellation.clone()).await;
        if exit_code != 0 {
            error!(exit_code, "webhook-triggered ingestion reported failures");
        }
    }

    server.abort();
    Ok(())
}

async fn register_sinks(cli: &Cli, pipeline: &Pipeline) -> anyhow::Result<()> {
    pipeline.register(Box::new(TerminalSink::new())).await;

    if let Some(path) = &cli.markdown_out {
        pipeline.register(Box::new(MarkdownSink::new(path.clone()))).await;
    }

    if let Some(path) = &cli.perfetto_out {
        pipeline.register(Box::new(PerfettoSink::new(path.clone()))).await;
    }

    if cli.tree {
        pipeline.register(Box::new(TreeSink::new())).await;
    }

    if let Some(database_url) = &cli.history_db {
        let history = HistorySink::connect(database_url).await?;
        pipeline.register(Box::new(history)).await;
    }

    if let Some(endpoint) = &cli.otlp_grpc_endpoint {
        pipeline.register(Box::new(OtlpSink::new(Transport::Grpc, endpoint)?)).await;
    }

    if let Some(endpoint) = &cli.otlp_http_endpoint {
        pipeline.register(Box::new(OtlpSink::new(Transport::Http, endpoint)?)).await;
    }

    Ok(())
}
