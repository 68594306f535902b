use anyhow::{Context, Result};
use clap::Parser;
use local_tunnel::cli::Cli;
use local_tunnel::stats::format_bytes;
use local_tunnel::{ConnectionPool, SysExit, TunnelError};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help / --version 也走这里，它们不算用法错误
            let code = if e.use_stderr() {
                SysExit::Usage
            } else {
                SysExit::Ok
            };
            let _ = e.print();
            return code.into();
        }
    };

    // Initialize logging based on verbosity level, RUST_LOG wins if set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => SysExit::Ok.into(),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("local-tunnel: {:#}", e);
            e.downcast_ref::<TunnelError>()
                .map(TunnelError::exit_code)
                .unwrap_or(SysExit::Software)
                .into()
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Local Tunnel v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.to_config().context("Invalid configuration")?;
    let local_port = config.local_port;

    let mut pool = ConnectionPool::new(config)?;
    pool.start(local_port)
        .await
        .with_context(|| format!("Failed to open tunnel for local port {}", local_port))?;

    println!("your url is: {}", pool.url().await?);

    let finished = tokio::select! {
        result = pool.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let result = match finished {
        Some(result) => result,
        None => {
            info!("Interrupted, stopping tunnel");
            pool.stop();
            pool.wait().await
        }
    };

    for stats in pool.stats() {
        info!(
            "{:03} sent {} / received {}",
            stats.index,
            format_bytes(stats.local_to_broker),
            format_bytes(stats.broker_to_local)
        );
    }

    result.context("Tunnel terminated")
}
