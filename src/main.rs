use std::sync::Arc;

use clap::Parser;
use colored::*;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use probe_status::cli::Args;
use probe_status::dashboard::HtmlRenderer;
use probe_status::server::{self, Router};
use probe_status::surfacer::ProbeStatus;
use probe_status::sysvars::{self, ProcessInfo};
use probe_status::{ingest, StatusError};

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sysvars::init();
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = args.load_config()?;
    let listener = TcpListener::bind(args.listen).await?;

    println!(
        "{} {} serving {} on http://{}{}",
        "probe-status".bold().cyan(),
        sysvars::version().dimmed(),
        "dashboard".green(),
        listener.local_addr()?,
        config.url,
    );

    let cancel = CancellationToken::new();
    let (actor, handle) = ProbeStatus::new(&config, ProcessInfo::current(), HtmlRenderer)?;
    let actor_task = actor.spawn(cancel.clone());

    let mut router = Router::new();
    handle.register(&mut router)?;

    if let Some(input) = args.input.clone() {
        let handle = handle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = if args.reads_stdin() {
                ingest::feed(BufReader::new(tokio::io::stdin()), &handle, cancel).await
            } else {
                match tokio::fs::File::open(&input).await {
                    Ok(file) => ingest::feed(BufReader::new(file), &handle, cancel).await,
                    Err(e) => Err(StatusError::Io(e)),
                }
            };
            match result {
                Ok(summary) => info!(
                    input = %input,
                    lines = summary.lines,
                    forwarded = summary.forwarded,
                    malformed = summary.malformed,
                    "ingest finished"
                ),
                Err(e) => error!(input = %input, error = %e, "ingest failed"),
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(e) => warn!(error = %e, "cannot listen for ctrl-c, shutting down"),
            }
            cancel.cancel();
        });
    }

    server::serve(listener, Arc::new(router), cancel.clone()).await?;
    cancel.cancel();
    actor_task.await?;

    let stats = handle.stats();
    println!(
        "{} accepted={} dropped={} discarded={} queries={}",
        "stopped".yellow(),
        stats.events_accepted,
        stats.events_dropped,
        stats.events_discarded,
        stats.queries_served,
    );
    Ok(())
}
