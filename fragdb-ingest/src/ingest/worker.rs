//! The job layer. A submission returns a job id immediately; the log is
//! then ingested on a bounded pool of workers, one pipeline instance per
//! job, with the CPU-bound pipeline running on the blocking thread pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::IngestConfig;
use crate::ingest::store::{MemStore, PgStore};
use crate::ingest::{IngestFatalError, IngestReport, run_pipeline};
use crate::source::FileSource;
use fragdb_db::pool::ConnectionPool;

const SUBMIT_QUEUE_DEPTH: usize = 64;

struct Job {
    id: u64,
    path: PathBuf,
}

pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    next_job_id: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl WorkerPool {
    /// `pool` is `None` for dry runs, which commit into a throwaway
    /// in-memory store instead of Postgres.
    pub fn new(config: IngestConfig, pool: Option<ConnectionPool>, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(SUBMIT_QUEUE_DEPTH);
        let dispatcher = tokio::spawn(dispatch(rx, config, pool, cancel));
        Self {
            tx,
            next_job_id: AtomicU64::new(1),
            dispatcher,
        }
    }

    /// Queues one log for ingestion and returns its job id immediately.
    /// `None` means the pool has shut down.
    pub async fn submit(&self, path: PathBuf) -> Option<u64> {
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        self.tx.send(Job { id, path }).await.ok()?;
        Some(id)
    }

    /// Stops accepting jobs and waits for in-flight ones to finish.
    pub async fn join(self) {
        drop(self.tx);
        if let Err(err) = self.dispatcher.await {
            error!("Job dispatcher panicked: {err}");
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<Job>,
    config: IngestConfig,
    pool: Option<ConnectionPool>,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(config.worker_count.max(1)));
    let mut running = Vec::new();

    loop {
        let job = tokio::select! {
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let config = config.clone();
        let pool = pool.clone();
        let cancel = cancel.clone();
        running.push(tokio::spawn(async move {
            let _permit = permit;
            run_job(job, config, pool, cancel).await;
        }));
    }

    for handle in running {
        let _ = handle.await;
    }
}

async fn run_job(
    job: Job,
    config: IngestConfig,
    pool: Option<ConnectionPool>,
    cancel: CancellationToken,
) {
    let Job { id, path } = job;
    info!("Job {id} starting on {}", path.display());

    let result =
        tokio::task::spawn_blocking(move || run_job_blocking(path, &config, pool, &cancel)).await;

    match result {
        Ok(Ok(report)) => info!(
            "Job {id} finished: {} games committed, {} already ingested, \
            {} events over {} lines",
            report.games_committed,
            report.games_already_ingested,
            report.events_processed,
            report.lines_read,
        ),
        Ok(Err(err)) => error!("Job {id} failed: {err}"),
        Err(join_err) => error!("Job {id} panicked: {join_err}"),
    }
}

fn run_job_blocking(
    path: PathBuf,
    config: &IngestConfig,
    pool: Option<ConnectionPool>,
    cancel: &CancellationToken,
) -> Result<IngestReport, IngestFatalError> {
    let mut source = FileSource::new(path);
    match pool {
        Some(pool) => {
            let conn = pool.get().map_err(crate::ingest::store::StoreError::from)?;
            let mut store = PgStore::new(conn, config.commit_retries);
            run_pipeline(&mut source, &mut store, config, cancel)
        }
        None => {
            let mut store = MemStore::new();
            let report = run_pipeline(&mut source, &mut store, config, cancel)?;
            info!(
                "Dry run: {} games would have been committed",
                report.games_committed
            );
            Ok(report)
        }
    }
}
