// ABOUTME: Receiver entrypoint — binds a TCP listener and dispatches received messages to configured sinks

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use astm_gateway::config::GatewayArgs;
use astm_gateway::dispatch::{Dispatcher, FileSink, HttpSink};
use astm_gateway::listener::Listener;

#[tokio::main]
async fn main() -> ExitCode {
    let args = GatewayArgs::parse();
    init_tracing(args.verbose);

    if let Err(e) = args.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    if let Err(e) = run(args).await {
        error!(error = %e, "gateway exited with error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(args: GatewayArgs) -> astm_gateway::Result<()> {
    let addr = args.addr()?;

    let file_sink = match &args.output {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                astm_gateway::GatewayError::Config(format!(
                    "failed to create output directory {}: {e}",
                    dir.display()
                ))
            })?;
            Some(FileSink::new(dir.clone()))
        }
        None => None,
    };
    let http_sink = args.url.clone().map(|url| {
        HttpSink::new(url, args.consumer.clone(), args.retries, args.retry_delay(), args.http_timeout())
    });
    let dispatcher = Dispatcher::new(file_sink, http_sink);

    let listener = Listener::bind(
        addr,
        dispatcher,
        args.timers(),
        args.buffer_cap,
        args.max_sessions,
        args.shutdown_grace(),
    )
    .await?;

    listener.run().await
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "astm_gateway=info",
        1 => "astm_gateway=debug",
        _ => "astm_gateway=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
