//! The ingestion pipeline: lexer → match tracker → event processor, driven
//! over an in-memory line array so an accepted match can be replayed from
//! its first round.

pub mod context;
pub mod event;
pub mod lexer;
pub mod processor;
pub mod rating;
pub mod store;
mod to_db;
pub mod tracker;
pub mod worker;

use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::IngestConfig;
use crate::ingest::processor::EventProcessor;
use crate::ingest::store::{GameStore, StoreError};
use crate::ingest::tracker::{MatchTracker, Step};
use crate::source::LineSource;

#[derive(Debug, Error)]
pub enum IngestFatalError {
    #[error("a game over arrived before any server identity line")]
    NoServerIdentity,
    #[error("the log tracks {tracked} round starts but the final score requires {required}")]
    LogIncomplete { tracked: usize, required: usize },
    #[error("the log exceeds the ceiling of {limit} lines")]
    LogTooLarge { limit: usize },
    #[error("ingest exceeded its {budget_secs} s wall-clock budget")]
    Timeout { budget_secs: u64 },
    #[error("ingest was cancelled")]
    Cancelled,
    #[error("failed to read the line source")]
    Source(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one pipeline run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub lines_read: usize,
    pub events_processed: usize,
    pub games_committed: usize,
    pub games_already_ingested: usize,
}

/// Runs one log through the pipeline. The store sees a single commit per
/// accepted match; everything else stays in memory and is dropped on any
/// fatal error, so there is never partial state to clean up.
pub fn run_pipeline(
    source: &mut dyn LineSource,
    store: &mut dyn GameStore,
    config: &IngestConfig,
    cancel: &CancellationToken,
) -> Result<IngestReport, IngestFatalError> {
    let read = source.read_lines(config.max_lines)?;
    if read.truncated {
        return Err(IngestFatalError::LogTooLarge {
            limit: config.max_lines,
        });
    }
    let lines = read.lines;
    debug!("Loaded {} lines", lines.len());

    let deadline = Instant::now() + Duration::from_secs(config.job_timeout_secs);
    let mut tracker = MatchTracker::new();
    let mut processor = EventProcessor::new();
    let mut report = IngestReport {
        lines_read: lines.len(),
        ..Default::default()
    };

    let mut cursor = 0;
    while cursor < lines.len() {
        if cancel.is_cancelled() {
            return Err(IngestFatalError::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(IngestFatalError::Timeout {
                budget_secs: config.job_timeout_secs,
            });
        }

        match tracker.step(&lines, cursor, store)? {
            Step::None => cursor += 1,
            Step::Emit { event, next_cursor } => {
                processor.apply(event, store)?;
                report.events_processed += 1;
                cursor = next_cursor;
            }
        }
    }

    report.games_committed = processor.games_committed();
    report.games_already_ingested = processor.games_already_ingested();

    if !processor.context_is_empty() {
        // A game over with no game-processed means the log ended mid-replay;
        // whatever was buffered is discarded, never half-committed.
        warn!("Dropping a match left open at the end of the log");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::MemStore;
    use crate::source::VecSource;

    #[test]
    fn cancelled_token_fails_the_job_before_any_work() {
        let mut source = VecSource::new(vec!["{}".to_string()]);
        let mut store = MemStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_pipeline(&mut source, &mut store, &IngestConfig::default(), &cancel);
        assert!(matches!(result, Err(IngestFatalError::Cancelled)));
        assert!(store.games.is_empty());
    }

    #[test]
    fn oversized_logs_are_rejected() {
        let config = IngestConfig {
            max_lines: 2,
            ..IngestConfig::default()
        };
        let mut source = VecSource::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut store = MemStore::new();

        let result = run_pipeline(&mut source, &mut store, &config, &CancellationToken::new());
        assert!(matches!(result, Err(IngestFatalError::LogTooLarge { limit: 2 })));
    }

    #[test]
    fn empty_source_reports_nothing() {
        let mut source = VecSource::new(Vec::new());
        let mut store = MemStore::new();

        let report = run_pipeline(
            &mut source,
            &mut store,
            &IngestConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(report, IngestReport::default());
    }
}
