//! The persistence adapter. A completed match is written in one transaction
//! and either lands whole or not at all; re-ingesting the same log is a
//! steady-state no-op keyed by the game's natural key.

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind};
use diesel::{PgConnection, prelude::*};
use hashbrown::HashMap;
use itertools::Itertools;
use log::{info, warn};

use crate::models::{NewAccolade, NewGame, NewGameEvent, NewPlayerStats};

/// Discriminator for the single-table event layout. The snake_case form is
/// what lands in `data.game_events.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    RoundStart,
    RoundEnd,
    Kill,
    Attack,
    Assist,
    BombPlant,
    BombDefuseBegin,
    BombDefused,
    BombExploded,
    GameOver,
    GameProcessed,
}

/// The dedup identity of a match. Two ingests of the same server log agree
/// on all three parts; nothing else is trusted to be stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaturalKey<'a> {
    pub server_identity: i64,
    pub game_over_time: DateTime<Utc>,
    pub map: &'a str,
}

#[derive(Debug, Clone)]
pub struct GameForDb {
    pub server_identity: i64,
    pub map: String,
    pub mode: String,
    pub score1: i32,
    pub score2: i32,
    pub duration_minutes: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub game_over_time: DateTime<Utc>,
}

impl GameForDb {
    pub fn natural_key(&self) -> NaturalKey<'_> {
        NaturalKey {
            server_identity: self.server_identity,
            game_over_time: self.game_over_time,
            map: &self.map,
        }
    }
}

/// One event row, still holding its round-start back-reference as an index
/// into the match's event list. The surrogate id is resolved at insert time.
#[derive(Debug, Clone)]
pub struct EventForDb {
    pub game_event_index: i32,
    pub kind: EventKind,
    pub event_time: DateTime<Utc>,
    pub round_start_index: Option<usize>,
    pub actor_name: Option<String>,
    pub actor_id: Option<String>,
    pub actor_team: Option<String>,
    pub target_name: Option<String>,
    pub target_id: Option<String>,
    pub target_team: Option<String>,
    pub weapon: Option<String>,
    pub headshot: Option<bool>,
    pub damage: Option<i32>,
    pub armor_damage: Option<i32>,
    pub health_remaining: Option<i32>,
    pub hitgroup: Option<String>,
    pub assist_kind: Option<String>,
    pub bomb_site: Option<String>,
    pub actor_pos: Option<(i32, i32, i32)>,
    pub target_pos: Option<(i32, i32, i32)>,
    pub scorecard: Option<serde_json::Value>,
}

impl EventForDb {
    pub fn new(game_event_index: i32, kind: EventKind, event_time: DateTime<Utc>) -> Self {
        Self {
            game_event_index,
            kind,
            event_time,
            round_start_index: None,
            actor_name: None,
            actor_id: None,
            actor_team: None,
            target_name: None,
            target_id: None,
            target_team: None,
            weapon: None,
            headshot: None,
            damage: None,
            armor_damage: None,
            health_remaining: None,
            hitgroup: None,
            assist_kind: None,
            bomb_site: None,
            actor_pos: None,
            target_pos: None,
            scorecard: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccoladeForDb {
    pub kind: String,
    pub player_id: String,
    pub player_name: String,
    pub value: f64,
    pub position: i32,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct PlayerStatsForDb {
    pub player_id: String,
    pub game_time: DateTime<Utc>,
    pub last_seen_nickname: String,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub headshot_kills: i32,
    pub rounds_played: i32,
    pub damage_dealt: f64,
    pub clutches_won: i32,
    pub rating: i32,
}

/// Everything a completed match materializes into, ready for one commit.
#[derive(Debug, Clone)]
pub struct MatchForDb {
    pub game: GameForDb,
    pub events: Vec<EventForDb>,
    pub accolades: Vec<AccoladeForDb>,
    pub stats: Vec<PlayerStatsForDb>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { game_id: i64 },
    /// The natural key already exists. Not an error; the log (or an
    /// overlapping one) was ingested before.
    AlreadyIngested,
}

pub fn game_exists(conn: &mut PgConnection, key: &NaturalKey) -> QueryResult<bool> {
    use crate::data::games::dsl;

    diesel::select(exists(
        dsl::games
            .filter(dsl::server_identity.eq(key.server_identity))
            .filter(dsl::game_over_time.eq(key.game_over_time.naive_utc()))
            .filter(dsl::map.eq(key.map)),
    ))
    .get_result(conn)
}

pub fn commit_match(conn: &mut PgConnection, m: &MatchForDb) -> QueryResult<CommitOutcome> {
    match conn.transaction(|conn| commit_match_internal(conn, m)) {
        Ok(game_id) => Ok(CommitOutcome::Committed { game_id }),
        Err(err) if is_natural_key_violation(&err) => {
            // The transaction has been rolled back whole.
            info!(
                "Match on {} at {} was already ingested",
                m.game.map, m.game.game_over_time
            );
            Ok(CommitOutcome::AlreadyIngested)
        }
        Err(err) => Err(err),
    }
}

/// True only for a unique violation on the games table, i.e. the natural
/// key. The commit also bulk-inserts events, accolades, and stats
/// snapshots; a unique violation on any of those is a data-integrity bug
/// and must surface as an error, never as a successful re-ingest.
fn is_natural_key_violation(err: &diesel::result::Error) -> bool {
    match err {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            info.table_name() == Some("games")
        }
        _ => false,
    }
}

fn commit_match_internal(conn: &mut PgConnection, m: &MatchForDb) -> QueryResult<i64> {
    use crate::data::accolades::dsl as accolades_dsl;
    use crate::data::game_events::dsl as events_dsl;
    use crate::data::games::dsl as games_dsl;
    use crate::data::player_stats::dsl as stats_dsl;

    let game = &m.game;
    let game_id = NewGame {
        server_identity: game.server_identity,
        map: &game.map,
        mode: &game.mode,
        score1: game.score1,
        score2: game.score2,
        duration_minutes: game.duration_minutes,
        start_time: game.start_time.naive_utc(),
        end_time: game.end_time.naive_utc(),
        game_over_time: game.game_over_time.naive_utc(),
    }
    .insert_into(games_dsl::games)
    .returning(games_dsl::id)
    .get_result::<i64>(conn)?;

    // Round starts go in first so every other event can carry the surrogate
    // id of the round it belongs to.
    let round_start_positions = m
        .events
        .iter()
        .enumerate()
        .filter(|(_, event)| event.kind == EventKind::RoundStart)
        .map(|(position, _)| position)
        .collect_vec();

    let new_round_starts = round_start_positions
        .iter()
        .map(|position| event_row(game_id, &m.events[*position], None))
        .collect_vec();
    let round_start_ids = diesel::insert_into(events_dsl::game_events)
        .values(&new_round_starts)
        .returning(events_dsl::id)
        .get_results::<i64>(conn)?;

    let id_for_position: HashMap<usize, i64> = round_start_positions
        .into_iter()
        .zip(round_start_ids)
        .collect();

    let new_events = m
        .events
        .iter()
        .filter(|event| event.kind != EventKind::RoundStart)
        .map(|event| {
            let round_start_id = event.round_start_index.and_then(|index| {
                let id = id_for_position.get(&index).copied();
                if id.is_none() {
                    warn!(
                        "Event {} references position {index}, which is not a round start",
                        event.game_event_index
                    );
                }
                id
            });
            event_row(game_id, event, round_start_id)
        })
        .collect_vec();
    diesel::insert_into(events_dsl::game_events)
        .values(&new_events)
        .execute(conn)?;

    let new_accolades = m
        .accolades
        .iter()
        .map(|accolade| NewAccolade {
            game_id,
            kind: &accolade.kind,
            player_id: &accolade.player_id,
            player_name: &accolade.player_name,
            value: accolade.value,
            position: accolade.position,
            score: accolade.score,
        })
        .collect_vec();
    diesel::insert_into(accolades_dsl::accolades)
        .values(&new_accolades)
        .execute(conn)?;

    let new_stats = m
        .stats
        .iter()
        .map(|stats| NewPlayerStats {
            player_id: &stats.player_id,
            game_time: stats.game_time.naive_utc(),
            last_seen_nickname: &stats.last_seen_nickname,
            kills: stats.kills,
            deaths: stats.deaths,
            assists: stats.assists,
            headshot_kills: stats.headshot_kills,
            rounds_played: stats.rounds_played,
            damage_dealt: stats.damage_dealt,
            clutches_won: stats.clutches_won,
            rating: stats.rating,
        })
        .collect_vec();
    diesel::insert_into(stats_dsl::player_stats)
        .values(&new_stats)
        .execute(conn)?;

    Ok(game_id)
}

fn event_row<'e>(game_id: i64, event: &'e EventForDb, round_start_id: Option<i64>) -> NewGameEvent<'e> {
    NewGameEvent {
        game_id,
        game_event_index: event.game_event_index,
        kind: <&'static str>::from(event.kind),
        event_time: event.event_time.naive_utc(),
        round_start_id,
        actor_name: event.actor_name.as_deref(),
        actor_id: event.actor_id.as_deref(),
        actor_team: event.actor_team.as_deref(),
        target_name: event.target_name.as_deref(),
        target_id: event.target_id.as_deref(),
        target_team: event.target_team.as_deref(),
        weapon: event.weapon.as_deref(),
        headshot: event.headshot,
        damage: event.damage,
        armor_damage: event.armor_damage,
        health_remaining: event.health_remaining,
        hitgroup: event.hitgroup.as_deref(),
        assist_kind: event.assist_kind.as_deref(),
        bomb_site: event.bomb_site.as_deref(),
        actor_x: event.actor_pos.map(|(x, _, _)| x),
        actor_y: event.actor_pos.map(|(_, y, _)| y),
        actor_z: event.actor_pos.map(|(_, _, z)| z),
        target_x: event.target_pos.map(|(x, _, _)| x),
        target_y: event.target_pos.map(|(_, y, _)| y),
        target_z: event.target_pos.map(|(_, _, z)| z),
        scorecard: event.scorecard.clone(),
    }
}

/// Removes a game and everything hanging off it in one transaction. Stats
/// snapshots are keyed by `(player_id, game_time)` rather than game id, so
/// they are matched through the game's end time.
pub fn delete_game(conn: &mut PgConnection, game_id: i64) -> QueryResult<bool> {
    use crate::data::accolades::dsl as accolades_dsl;
    use crate::data::game_events::dsl as events_dsl;
    use crate::data::games::dsl as games_dsl;
    use crate::data::player_stats::dsl as stats_dsl;

    conn.transaction(|conn| {
        let end_time = games_dsl::games
            .filter(games_dsl::id.eq(game_id))
            .select(games_dsl::end_time)
            .get_result::<NaiveDateTime>(conn)
            .optional()?;
        let Some(end_time) = end_time else {
            return Ok(false);
        };

        diesel::delete(events_dsl::game_events.filter(events_dsl::game_id.eq(game_id)))
            .execute(conn)?;
        diesel::delete(accolades_dsl::accolades.filter(accolades_dsl::game_id.eq(game_id)))
            .execute(conn)?;
        diesel::delete(stats_dsl::player_stats.filter(stats_dsl::game_time.eq(end_time)))
            .execute(conn)?;
        diesel::delete(games_dsl::games.filter(games_dsl::id.eq(game_id))).execute(conn)?;

        Ok(true)
    })
}

pub fn game_count(conn: &mut PgConnection) -> QueryResult<i64> {
    use crate::data::games::dsl::*;

    games.count().get_result(conn)
}

pub fn event_count(conn: &mut PgConnection) -> QueryResult<i64> {
    use crate::data::game_events::dsl::*;

    game_events.count().get_result(conn)
}

pub fn accolade_count(conn: &mut PgConnection) -> QueryResult<i64> {
    use crate::data::accolades::dsl::*;

    accolades.count().get_result(conn)
}

pub fn stats_count(conn: &mut PgConnection) -> QueryResult<i64> {
    use crate::data::player_stats::dsl::*;

    player_stats.count().get_result(conn)
}

/// True for errors worth retrying a commit over. Everything else is either a
/// bug in the match data or a misconfiguration.
pub fn is_transient(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _)
            | diesel::result::Error::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
            | diesel::result::Error::BrokenTransactionManager
    )
}
