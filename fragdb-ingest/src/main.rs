use std::path::PathBuf;

use log::info;
use miette::{IntoDiagnostic, miette};
use tokio_util::sync::CancellationToken;

use fragdb_ingest::config::IngestConfig;
use fragdb_ingest::ingest::worker::WorkerPool;

#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = IngestConfig::config().into_diagnostic()?;

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        return Err(miette!("usage: fragdb-ingest <log file>…"));
    }

    let pool = if config.dry_run {
        None
    } else {
        Some(fragdb_db::pool::get_pool(config.db_pool_size).into_diagnostic()?)
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received; cancelling in-flight jobs");
                cancel.cancel();
            }
        }
    });

    let workers = WorkerPool::new(config, pool, cancel);
    for path in paths {
        match workers.submit(path.clone()).await {
            Some(id) => info!("Submitted job {id} for {}", path.display()),
            None => return Err(miette!("the job queue is closed")),
        }
    }
    workers.join().await;

    Ok(())
}
