//! Brackets matches out of the raw line stream. Server logs interleave
//! warmup, practice, and real matches, and only the game-over line proves a
//! match happened; the tracker therefore collects round-start offsets and,
//! when a game-over is accepted, rewinds the cursor so the driver replays
//! exactly the match's own rounds.

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::ingest::IngestFatalError;
use crate::ingest::event::{EventData, MatchEvent};
use crate::ingest::lexer::{self, Lexer};
use crate::ingest::store::GameStore;
use fragdb_db::db::NaturalKey;

/// A game-over with fewer adjacent accolade lines than this is a warmup or
/// a severely under-populated lobby, not a match.
const MIN_ACCOLADES: usize = 6;

/// What the driver should do after feeding one line.
#[derive(Debug)]
pub enum Step {
    /// Line consumed; advance to the next one.
    None,
    /// Forward `event` downstream and resume the scan at line `next_cursor`,
    /// which is behind the current line when a match starts replaying.
    Emit {
        event: MatchEvent,
        next_cursor: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Collecting round-start offsets; in-round lines are ignored.
    Tracking,
    /// Replaying a confirmed match; in-round lines become events.
    Playing,
}

pub struct MatchTracker {
    lexer: Lexer,
    mode: Mode,
    round_starts: Vec<usize>,
    /// Line index of the game-over that opened the current playing window.
    match_end_cursor: usize,
    match_end_time: Option<DateTime<Utc>>,
    server_identity: Option<i64>,
}

impl MatchTracker {
    pub fn new() -> Self {
        Self {
            lexer: Lexer::new(),
            mode: Mode::Tracking,
            round_starts: Vec::new(),
            match_end_cursor: 0,
            match_end_time: None,
            server_identity: None,
        }
    }

    pub fn step(
        &mut self,
        lines: &[String],
        cursor: usize,
        store: &mut dyn GameStore,
    ) -> Result<Step, IngestFatalError> {
        if self.mode == Mode::Playing && cursor == self.match_end_cursor {
            // The replay has caught back up with the game-over line.
            let at = self
                .match_end_time
                .take()
                .expect("match end time is set while playing");
            self.mode = Mode::Tracking;
            self.round_starts.clear();
            debug!("Replay complete at line {cursor}");
            return Ok(Step::Emit {
                event: MatchEvent {
                    at,
                    data: EventData::GameProcessed,
                },
                next_cursor: cursor + 1,
            });
        }

        let Some(event) = self.lexer.scan(&lines[cursor]) else {
            return Ok(Step::None);
        };

        match self.mode {
            Mode::Tracking => self.step_tracking(lines, cursor, event, store),
            Mode::Playing => Ok(self.step_playing(cursor, event)),
        }
    }

    fn step_tracking(
        &mut self,
        lines: &[String],
        cursor: usize,
        event: MatchEvent,
        store: &mut dyn GameStore,
    ) -> Result<Step, IngestFatalError> {
        match event.data {
            EventData::ServerIdentity { app_server_id } => {
                self.server_identity = Some(app_server_id);
                Ok(Step::Emit {
                    event,
                    next_cursor: cursor + 1,
                })
            }
            EventData::RoundStart => {
                self.round_starts.push(cursor);
                Ok(Step::None)
            }
            EventData::GameOver { .. } => self.evaluate_game_over(lines, cursor, event, store),
            _ => Ok(Step::None),
        }
    }

    fn evaluate_game_over(
        &mut self,
        lines: &[String],
        cursor: usize,
        event: MatchEvent,
        store: &mut dyn GameStore,
    ) -> Result<Step, IngestFatalError> {
        let at = event.at;
        let EventData::GameOver {
            map,
            mode,
            score1,
            score2,
            duration_minutes,
            ..
        } = event.data
        else {
            unreachable!("evaluate_game_over is only called with a game-over event");
        };

        let Some(server_identity) = self.server_identity else {
            return Err(IngestFatalError::NoServerIdentity);
        };

        // The server prints the accolade block directly above the game-over
        // line; a serious match has at least six of them.
        let mut accolades = Vec::new();
        for line in lines[..cursor].iter().rev() {
            match lexer::accolade_line(line) {
                Some((_, accolade)) => accolades.push(accolade),
                None => break,
            }
        }
        accolades.reverse();

        if accolades.len() < MIN_ACCOLADES {
            debug!(
                "Rejecting game over on {map} at {at}: only {} accolades",
                accolades.len()
            );
            self.round_starts.clear();
            return Ok(Step::None);
        }

        let key = NaturalKey {
            server_identity,
            game_over_time: at,
            map: &map,
        };
        if store.game_exists(&key)? {
            info!("Skipping already-ingested match on {map} at {at}");
            self.round_starts.clear();
            return Ok(Step::None);
        }

        let rounds = (score1 + score2) as usize;
        if self.round_starts.len() < rounds {
            return Err(IngestFatalError::LogIncomplete {
                tracked: self.round_starts.len(),
                required: rounds,
            });
        }
        // A 0:0 game over has nothing to replay; the playing window opens
        // and closes on the game-over line itself.
        let first_round_line = if rounds == 0 {
            cursor
        } else {
            self.round_starts[self.round_starts.len() - rounds]
        };

        info!(
            "Accepted match on {map} ({score1}:{score2}); replaying {rounds} rounds from line {first_round_line}"
        );

        self.mode = Mode::Playing;
        self.match_end_cursor = cursor;
        self.match_end_time = Some(at);

        Ok(Step::Emit {
            event: MatchEvent {
                at,
                data: EventData::GameOver {
                    map,
                    mode,
                    score1,
                    score2,
                    duration_minutes,
                    accolades,
                },
            },
            next_cursor: first_round_line,
        })
    }

    fn step_playing(&mut self, cursor: usize, event: MatchEvent) -> Step {
        match event.data {
            // Only the game-over that opened this window matters, and it is
            // handled by cursor position; its accolades were captured then.
            EventData::GameOver { .. }
            | EventData::Accolade(_)
            | EventData::ServerIdentity { .. } => Step::None,
            _ => Step::Emit {
                event,
                next_cursor: cursor + 1,
            },
        }
    }
}

impl Default for MatchTracker {
    fn default() -> Self {
        Self::new()
    }
}
