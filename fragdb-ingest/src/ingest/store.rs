//! The seam between the pipeline and persistence. The pipeline only ever
//! needs two questions answered — "was this match ingested before?" and
//! "commit this match whole" — so that is the whole trait.

use std::thread::sleep;
use std::time::Duration;

use hashbrown::{HashMap, HashSet};
use log::warn;
use thiserror::Error;

use fragdb_db::db::{self, AccoladeForDb, CommitOutcome, EventForDb, EventKind, GameForDb, MatchForDb, NaturalKey, PlayerStatsForDb};
use fragdb_db::pool::PooledPgConnection;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database query failed: {0}")]
    Query(#[from] fragdb_db::QueryError),
    #[error("couldn't get a database connection: {0}")]
    Pool(#[from] fragdb_db::pool::PoolError),
}

pub trait GameStore {
    fn game_exists(&mut self, key: &NaturalKey) -> Result<bool, StoreError>;
    fn commit_match(&mut self, m: &MatchForDb) -> Result<CommitOutcome, StoreError>;
}

/// The real adapter: one pooled connection held for the lifetime of a job.
/// Transient failures (serialization conflicts, dropped connections) get a
/// bounded exponential-backoff retry before turning fatal.
pub struct PgStore {
    conn: PooledPgConnection,
    commit_retries: u32,
}

impl PgStore {
    pub fn new(conn: PooledPgConnection, commit_retries: u32) -> Self {
        Self {
            conn,
            commit_retries,
        }
    }
}

impl GameStore for PgStore {
    fn game_exists(&mut self, key: &NaturalKey) -> Result<bool, StoreError> {
        Ok(db::game_exists(&mut self.conn, key)?)
    }

    fn commit_match(&mut self, m: &MatchForDb) -> Result<CommitOutcome, StoreError> {
        let mut backoff = Duration::from_millis(250);
        let mut attempt = 0;
        loop {
            match db::commit_match(&mut self.conn, m) {
                Ok(outcome) => return Ok(outcome),
                Err(err) if db::is_transient(&err) && attempt < self.commit_retries => {
                    attempt += 1;
                    warn!(
                        "Transient error committing match (attempt {attempt}): {err}; \
                        retrying in {backoff:?}"
                    );
                    sleep(backoff);
                    backoff *= 2;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// One persisted event row as the in-memory store keeps it.
#[derive(Debug, Clone)]
pub struct MemEvent {
    pub id: i64,
    pub game_id: i64,
    pub round_start_id: Option<i64>,
    pub row: EventForDb,
}

/// In-memory store used by tests and dry runs. Ids are handed out the way
/// the database would, and the games natural key is enforced.
#[derive(Default)]
pub struct MemStore {
    next_id: i64,
    pub games: Vec<(i64, GameForDb)>,
    pub events: Vec<MemEvent>,
    pub accolades: Vec<(i64, AccoladeForDb)>,
    pub stats: Vec<PlayerStatsForDb>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl GameStore for MemStore {
    fn game_exists(&mut self, key: &NaturalKey) -> Result<bool, StoreError> {
        Ok(self.games.iter().any(|(_, game)| game.natural_key() == *key))
    }

    fn commit_match(&mut self, m: &MatchForDb) -> Result<CommitOutcome, StoreError> {
        // Only the games natural key reads as a re-ingest; the child-table
        // unique keys are enforced the way the database enforces them, as
        // errors. Checked up front so a failed commit changes nothing.
        if self.game_exists(&m.game.natural_key())? {
            return Ok(CommitOutcome::AlreadyIngested);
        }
        let mut snapshot_keys = HashSet::new();
        for stats in &m.stats {
            let collides = !snapshot_keys.insert((stats.player_id.as_str(), stats.game_time))
                || self.stats.iter().any(|existing| {
                    existing.player_id == stats.player_id && existing.game_time == stats.game_time
                });
            if collides {
                return Err(unique_violation("player_stats"));
            }
        }
        let mut accolade_keys = HashSet::new();
        for accolade in &m.accolades {
            if !accolade_keys.insert((accolade.kind.as_str(), accolade.player_id.as_str())) {
                return Err(unique_violation("accolades"));
            }
        }

        let game_id = self.next_id();
        self.games.push((game_id, m.game.clone()));

        // Round starts first, mirroring the real adapter's id resolution.
        let mut id_for_position = HashMap::new();
        for (position, event) in m.events.iter().enumerate() {
            if event.kind == EventKind::RoundStart {
                let id = self.next_id();
                id_for_position.insert(position, id);
                self.events.push(MemEvent {
                    id,
                    game_id,
                    round_start_id: None,
                    row: event.clone(),
                });
            }
        }
        for event in m.events.iter().filter(|e| e.kind != EventKind::RoundStart) {
            let id = self.next_id();
            let round_start_id = event
                .round_start_index
                .and_then(|index| id_for_position.get(&index).copied());
            self.events.push(MemEvent {
                id,
                game_id,
                round_start_id,
                row: event.clone(),
            });
        }

        for accolade in &m.accolades {
            self.accolades.push((game_id, accolade.clone()));
        }
        self.stats.extend(m.stats.iter().cloned());

        Ok(CommitOutcome::Committed { game_id })
    }
}

fn unique_violation(table: &str) -> StoreError {
    StoreError::Query(fragdb_db::QueryError::DatabaseError(
        fragdb_db::DatabaseErrorKind::UniqueViolation,
        Box::new(format!("duplicate key value in {table}")),
    ))
}
