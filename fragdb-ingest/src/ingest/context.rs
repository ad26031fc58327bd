use chrono::{DateTime, Utc};
use hashbrown::HashMap;

use crate::ingest::event::{AccoladeLine, EventData, Team};
use crate::ingest::rating;

/// A match under construction, before it has a database identity.
#[derive(Debug, Clone)]
pub struct PendingGame {
    pub server_identity: i64,
    pub map: String,
    pub mode: String,
    pub score1: i32,
    pub score2: i32,
    pub duration_minutes: Option<i32>,
    pub game_over_time: DateTime<Utc>,
}

/// An event held in the context's arena. The round-start back-reference is
/// an index into the same arena; it becomes a surrogate id at insert time.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub at: DateTime<Utc>,
    pub data: EventData,
    pub round_start: Option<usize>,
}

/// Live per-player tallies for the match being replayed.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub nickname: String,
    pub team: Option<Team>,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub headshot_kills: i32,
    pub rounds_played: i32,
    pub damage_dealt: f64,
    pub clutches_won: i32,
    pub rating: f64,
}

impl PlayerState {
    pub fn new(nickname: String, team: Option<Team>) -> Self {
        Self {
            nickname,
            team,
            kills: 0,
            deaths: 0,
            assists: 0,
            headshot_kills: 0,
            rounds_played: 0,
            damage_dealt: 0.0,
            clutches_won: 0,
            rating: rating::INITIAL_RATING,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub state: PlayerState,
}

/// Per-job scratchpad owning everything in flight for the current match.
/// Commit transfers ownership to the database; discard just drops it.
#[derive(Default)]
pub struct IngestContext {
    pub server_identity: Option<i64>,
    pub current_game: Option<PendingGame>,
    pub current_round_start: Option<usize>,
    pub pending_events: Vec<PendingEvent>,
    pub pending_accolades: Vec<AccoladeLine>,
    /// Steam id → live tallies. Bots never get an entry.
    pub players: HashMap<String, PlayerState>,
    /// Server slot → steam id, refreshed from every non-bot observation.
    /// Accolade lines identify players by nickname and slot only, and
    /// nicknames are not unique.
    pub slots: HashMap<i32, String>,
    /// Steam id → latest round snapshot; one row per player survives.
    pub pending_stats: HashMap<String, StatsSnapshot>,
    pub first_round_end: Option<DateTime<Utc>>,
}

impl IngestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no match is being assembled.
    pub fn is_empty(&self) -> bool {
        self.current_game.is_none() && self.pending_events.is_empty()
    }

    /// Forgets the current match. The server identity stays; it belongs to
    /// the stream, not to any one match.
    pub fn clear_match(&mut self) {
        self.current_game = None;
        self.current_round_start = None;
        self.pending_events.clear();
        self.pending_accolades.clear();
        self.players.clear();
        self.slots.clear();
        self.pending_stats.clear();
        self.first_round_end = None;
    }

    pub fn push_event(
        &mut self,
        at: DateTime<Utc>,
        data: EventData,
        round_start: Option<usize>,
    ) -> usize {
        let index = self.pending_events.len();
        self.pending_events.push(PendingEvent {
            at,
            data,
            round_start,
        });
        index
    }
}
