//! Consumes the event stream one match at a time: mutates per-player
//! tallies, rates the roster at every round end, and materializes the whole
//! match into the store in a single commit when the synthetic game-processed
//! event arrives.

use chrono::{DateTime, Duration, Utc};
use hashbrown::HashSet;
use itertools::Itertools;
use log::{debug, info, warn};

use crate::ingest::IngestFatalError;
use crate::ingest::context::{IngestContext, PendingGame, PlayerState, StatsSnapshot};
use crate::ingest::event::{
    AccoladeLine, Actor, AssistKind, BombSite, EventData, MatchEvent, Position, RoundScore, Team,
};
use crate::ingest::rating::{self, Contender};
use crate::ingest::store::GameStore;
use crate::ingest::to_db;
use fragdb_db::db::{AccoladeForDb, CommitOutcome, GameForDb, MatchForDb, PlayerStatsForDb};

/// How far before the earliest round end a match is assumed to have begun.
const START_TIME_LEAD_SECS: i64 = 120;
/// Fallback match length when no round end was observed at all.
const FALLBACK_MATCH_HOURS: i64 = 2;

pub struct EventProcessor {
    ctx: IngestContext,
    games_committed: usize,
    games_already_ingested: usize,
}

impl EventProcessor {
    pub fn new() -> Self {
        Self {
            ctx: IngestContext::new(),
            games_committed: 0,
            games_already_ingested: 0,
        }
    }

    pub fn context_is_empty(&self) -> bool {
        self.ctx.is_empty()
    }

    pub fn games_committed(&self) -> usize {
        self.games_committed
    }

    pub fn games_already_ingested(&self) -> usize {
        self.games_already_ingested
    }

    pub fn apply(
        &mut self,
        event: MatchEvent,
        store: &mut dyn GameStore,
    ) -> Result<(), IngestFatalError> {
        let at = event.at;
        match event.data {
            EventData::ServerIdentity { app_server_id } => {
                self.ctx.server_identity = Some(app_server_id);
                Ok(())
            }
            EventData::RoundStart => {
                let index = self.ctx.push_event(at, EventData::RoundStart, None);
                self.ctx.current_round_start = Some(index);
                Ok(())
            }
            EventData::RoundEnd { players } => {
                self.round_end(at, players);
                Ok(())
            }
            EventData::Kill {
                killer,
                victim,
                weapon,
                headshot,
                killer_pos,
                victim_pos,
            } => {
                self.kill(at, killer, victim, weapon, headshot, killer_pos, victim_pos);
                Ok(())
            }
            EventData::Attack {
                attacker,
                victim,
                weapon,
                damage,
                armor_damage,
                health_remaining,
                hitgroup,
                attacker_pos,
                victim_pos,
            } => {
                self.attack(
                    at,
                    attacker,
                    victim,
                    weapon,
                    damage,
                    armor_damage,
                    health_remaining,
                    hitgroup,
                    attacker_pos,
                    victim_pos,
                );
                Ok(())
            }
            EventData::Assist {
                assister,
                victim,
                kind,
            } => {
                self.assist(at, assister, victim, kind);
                Ok(())
            }
            EventData::BombPlant { player, site } => {
                self.bomb_plant(at, player, site);
                Ok(())
            }
            EventData::BombDefuseBegin { player } => {
                self.bomb_defuse_begin(at, player);
                Ok(())
            }
            EventData::BombDefused => {
                self.push_in_round(at, EventData::BombDefused);
                Ok(())
            }
            EventData::BombExploded => {
                self.push_in_round(at, EventData::BombExploded);
                Ok(())
            }
            EventData::GameOver {
                map,
                mode,
                score1,
                score2,
                duration_minutes,
                accolades,
            } => self.game_over(at, map, mode, score1, score2, duration_minutes, accolades),
            EventData::GameProcessed => self.game_processed(at, store),
            EventData::Accolade(_) => {
                // Accolades reach the context on the game-over event; a loose
                // one in the stream means the tracker let it through.
                debug!("Ignoring stray accolade event");
                Ok(())
            }
        }
    }

    /// Buffers an in-round event bound to the round in progress. The odd
    /// line that precedes the first replayed round start has no round to
    /// belong to and is dropped.
    fn push_in_round(&mut self, at: DateTime<Utc>, data: EventData) {
        let Some(round_start) = self.ctx.current_round_start else {
            debug!("Dropping in-round event with no round in progress");
            return;
        };
        self.ctx.push_event(at, data, Some(round_start));
    }

    /// Looks up (or creates) the live tally for a non-bot actor, refreshing
    /// the nickname, team, and slot mapping while at it.
    fn touch_player(&mut self, actor: &Actor) -> &mut PlayerState {
        let id = actor
            .steam_id
            .clone()
            .expect("bots never reach touch_player");
        self.ctx.slots.insert(actor.slot, id.clone());
        let state = self
            .ctx
            .players
            .entry(id)
            .or_insert_with(|| PlayerState::new(actor.name.clone(), actor.team));
        if state.nickname != actor.name {
            state.nickname = actor.name.clone();
        }
        if actor.team.is_some() {
            state.team = actor.team;
        }
        state
    }

    fn touch_scorecard(&mut self, score: &RoundScore) -> &mut PlayerState {
        let team = score.team.as_deref().and_then(Team::from_log);
        self.ctx.slots.insert(score.slot, score.steamid.clone());
        let state = self
            .ctx
            .players
            .entry(score.steamid.clone())
            .or_insert_with(|| PlayerState::new(score.name.clone(), team));
        if state.nickname != score.name {
            state.nickname = score.name.clone();
        }
        if team.is_some() {
            state.team = team;
        }
        state
    }

    #[allow(clippy::too_many_arguments)]
    fn kill(
        &mut self,
        at: DateTime<Utc>,
        killer: Actor,
        victim: Actor,
        weapon: String,
        headshot: bool,
        killer_pos: Position,
        victim_pos: Position,
    ) {
        if killer.is_bot() && victim.is_bot() {
            return;
        }
        if !killer.is_bot() {
            let state = self.touch_player(&killer);
            state.kills += 1;
            if headshot {
                state.headshot_kills += 1;
            }
        }
        if !victim.is_bot() {
            self.touch_player(&victim).deaths += 1;
        }
        self.push_in_round(
            at,
            EventData::Kill {
                killer,
                victim,
                weapon,
                headshot,
                killer_pos,
                victim_pos,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn attack(
        &mut self,
        at: DateTime<Utc>,
        attacker: Actor,
        victim: Actor,
        weapon: String,
        damage: i32,
        armor_damage: i32,
        health_remaining: i32,
        hitgroup: String,
        attacker_pos: Position,
        victim_pos: Position,
    ) {
        if attacker.is_bot() && victim.is_bot() {
            return;
        }
        if !attacker.is_bot() {
            self.touch_player(&attacker).damage_dealt += damage as f64;
        }
        self.push_in_round(
            at,
            EventData::Attack {
                attacker,
                victim,
                weapon,
                damage,
                armor_damage,
                health_remaining,
                hitgroup,
                attacker_pos,
                victim_pos,
            },
        );
    }

    fn assist(&mut self, at: DateTime<Utc>, assister: Actor, victim: Actor, kind: AssistKind) {
        if assister.is_bot() && victim.is_bot() {
            return;
        }
        if !assister.is_bot() {
            self.touch_player(&assister).assists += 1;
        }
        self.push_in_round(
            at,
            EventData::Assist {
                assister,
                victim,
                kind,
            },
        );
    }

    fn bomb_plant(&mut self, at: DateTime<Utc>, player: Actor, site: BombSite) {
        if player.is_bot() {
            return;
        }
        self.push_in_round(at, EventData::BombPlant { player, site });
    }

    fn bomb_defuse_begin(&mut self, at: DateTime<Utc>, player: Actor) {
        if player.is_bot() {
            return;
        }
        self.push_in_round(at, EventData::BombDefuseBegin { player });
    }

    fn round_end(&mut self, at: DateTime<Utc>, players: Vec<RoundScore>) {
        for score in players.iter().filter(|score| !score.is_bot()) {
            let state = self.touch_scorecard(score);
            state.rounds_played += 1;
            if score.clutch {
                state.clutches_won += 1;
            }
        }

        // Rate the round before snapshotting, so the snapshots carry the
        // post-round ratings.
        let roster = players
            .iter()
            .filter(|score| !score.is_bot())
            .filter_map(|score| {
                self.ctx.players.get(&score.steamid).map(|state| {
                    (
                        score.steamid.as_str(),
                        Contender {
                            rating: state.rating,
                            kills: score.kills,
                        },
                    )
                })
            })
            .collect_vec();
        let mut contenders = roster.iter().map(|(_, c)| *c).collect_vec();
        rating::rate_round(&mut contenders);
        for ((id, _), contender) in roster.iter().zip(&contenders) {
            if let Some(state) = self.ctx.players.get_mut(*id) {
                state.rating = contender.rating;
            }
        }

        for score in players.iter().filter(|score| !score.is_bot()) {
            if let Some(state) = self.ctx.players.get(&score.steamid) {
                let newer = match self.ctx.pending_stats.get(&score.steamid) {
                    Some(existing) => existing.taken_at <= at,
                    None => true,
                };
                if newer {
                    self.ctx.pending_stats.insert(
                        score.steamid.clone(),
                        StatsSnapshot {
                            taken_at: at,
                            state: state.clone(),
                        },
                    );
                }
            }
        }

        match self.ctx.first_round_end {
            Some(existing) if existing <= at => {}
            _ => self.ctx.first_round_end = Some(at),
        }

        self.push_in_round(at, EventData::RoundEnd { players });
    }

    #[allow(clippy::too_many_arguments)]
    fn game_over(
        &mut self,
        at: DateTime<Utc>,
        map: String,
        mode: String,
        score1: i32,
        score2: i32,
        duration_minutes: Option<i32>,
        accolades: Vec<AccoladeLine>,
    ) -> Result<(), IngestFatalError> {
        let Some(server_identity) = self.ctx.server_identity else {
            return Err(IngestFatalError::NoServerIdentity);
        };

        self.ctx.current_game = Some(PendingGame {
            server_identity,
            map: map.clone(),
            mode: mode.clone(),
            score1,
            score2,
            duration_minutes,
            game_over_time: at,
        });
        self.ctx.pending_accolades = accolades;
        // The persisted game-over row carries no accolades of its own; they
        // get their own table once the game id exists.
        self.ctx.push_event(
            at,
            EventData::GameOver {
                map,
                mode,
                score1,
                score2,
                duration_minutes,
                accolades: Vec::new(),
            },
            None,
        );
        Ok(())
    }

    fn game_processed(
        &mut self,
        at: DateTime<Utc>,
        store: &mut dyn GameStore,
    ) -> Result<(), IngestFatalError> {
        self.ctx.push_event(at, EventData::GameProcessed, None);

        let Some(game) = self.ctx.current_game.take() else {
            warn!("Game-processed arrived with no game in flight; discarding buffered events");
            self.ctx.clear_match();
            return Ok(());
        };

        let completed = self.assemble(game);
        match store.commit_match(&completed)? {
            CommitOutcome::Committed { game_id } => {
                info!(
                    "Committed match {game_id} on {} with {} events, {} accolades, {} players",
                    completed.game.map,
                    completed.events.len(),
                    completed.accolades.len(),
                    completed.stats.len(),
                );
                self.games_committed += 1;
            }
            CommitOutcome::AlreadyIngested => {
                self.games_already_ingested += 1;
            }
        }
        self.ctx.clear_match();
        Ok(())
    }

    fn assemble(&mut self, game: PendingGame) -> MatchForDb {
        let end_time = game.game_over_time;
        let start_time = match self.ctx.first_round_end {
            Some(first) => first - Duration::seconds(START_TIME_LEAD_SECS),
            None => end_time - Duration::hours(FALLBACK_MATCH_HOURS),
        };

        let game = GameForDb {
            server_identity: game.server_identity,
            map: game.map,
            mode: game.mode,
            score1: game.score1,
            score2: game.score2,
            duration_minutes: game.duration_minutes,
            start_time,
            end_time,
            game_over_time: game.game_over_time,
        };

        let events = self
            .ctx
            .pending_events
            .iter()
            .enumerate()
            .map(|(index, event)| to_db::event_row(index as i32, event))
            .collect_vec();

        let accolades = self.link_accolades();

        let mut stats = self
            .ctx
            .pending_stats
            .iter()
            .map(|(id, snapshot)| PlayerStatsForDb {
                player_id: id.clone(),
                game_time: end_time,
                last_seen_nickname: snapshot.state.nickname.clone(),
                kills: snapshot.state.kills,
                deaths: snapshot.state.deaths,
                assists: snapshot.state.assists,
                headshot_kills: snapshot.state.headshot_kills,
                rounds_played: snapshot.state.rounds_played,
                damage_dealt: snapshot.state.damage_dealt,
                clutches_won: snapshot.state.clutches_won,
                rating: snapshot.state.rating.round() as i32,
            })
            .collect_vec();
        stats.sort_by(|a, b| a.player_id.cmp(&b.player_id));

        MatchForDb {
            game,
            events,
            accolades,
            stats,
        }
    }

    /// Resolves queued accolade lines against the roster. The server names
    /// a player by nickname and slot; the slot pins the steam id, since
    /// nicknames are not unique, and the nickname guards against a slot
    /// that was reused mid-match. Bots and strangers drop out here, and a
    /// `(kind, player)` pair is awarded at most once per game.
    fn link_accolades(&self) -> Vec<AccoladeForDb> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut out = Vec::new();
        for accolade in &self.ctx.pending_accolades {
            let resolved = self.ctx.slots.get(&accolade.player_slot).filter(|id| {
                self.ctx
                    .players
                    .get(id.as_str())
                    .is_some_and(|state| state.nickname == accolade.player_name)
            });
            let Some(player_id) = resolved else {
                warn!(
                    "Dropping accolade {} for {} (slot {}): no matching roster entry",
                    accolade.kind, accolade.player_name, accolade.player_slot
                );
                continue;
            };
            if !seen.insert((accolade.kind.clone(), player_id.clone())) {
                continue;
            }
            out.push(AccoladeForDb {
                kind: accolade.kind.clone(),
                player_id: player_id.clone(),
                player_name: accolade.player_name.clone(),
                value: accolade.value,
                position: accolade.position,
                score: accolade.score,
            });
        }
        out
    }
}

impl Default for EventProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::MemStore;
    use chrono::TimeZone;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, second).unwrap()
    }

    fn human(name: &str, id: &str) -> Actor {
        Actor {
            name: name.to_string(),
            slot: 1,
            steam_id: Some(id.to_string()),
            team: Some(Team::Defenders),
        }
    }

    fn bot(name: &str) -> Actor {
        Actor {
            name: name.to_string(),
            slot: 9,
            steam_id: None,
            team: Some(Team::Attackers),
        }
    }

    fn apply(processor: &mut EventProcessor, store: &mut MemStore, second: u32, data: EventData) {
        processor
            .apply(
                MatchEvent {
                    at: at(second),
                    data,
                },
                store,
            )
            .unwrap();
    }

    fn kill_event(killer: Actor, victim: Actor, headshot: bool) -> EventData {
        EventData::Kill {
            killer,
            victim,
            weapon: "ak47".to_string(),
            headshot,
            killer_pos: None,
            victim_pos: None,
        }
    }

    #[test]
    fn bot_only_kill_is_discarded_entirely() {
        let mut processor = EventProcessor::new();
        let mut store = MemStore::new();
        apply(&mut processor, &mut store, 0, EventData::RoundStart);
        apply(
            &mut processor,
            &mut store,
            1,
            kill_event(bot("Hank"), bot("Dave"), false),
        );

        assert_eq!(processor.ctx.pending_events.len(), 1, "only the round start");
        assert!(processor.ctx.players.is_empty());
    }

    #[test]
    fn bot_participant_is_not_tallied_but_the_event_survives() {
        let mut processor = EventProcessor::new();
        let mut store = MemStore::new();
        apply(&mut processor, &mut store, 0, EventData::RoundStart);
        apply(
            &mut processor,
            &mut store,
            1,
            kill_event(human("arrow", "STEAM_1:0:1"), bot("Dave"), true),
        );

        assert_eq!(processor.ctx.pending_events.len(), 2);
        let arrow = &processor.ctx.players["STEAM_1:0:1"];
        assert_eq!(arrow.kills, 1);
        assert_eq!(arrow.headshot_kills, 1);
    }

    #[test]
    fn headshot_kills_never_exceed_kills() {
        let mut processor = EventProcessor::new();
        let mut store = MemStore::new();
        apply(&mut processor, &mut store, 0, EventData::RoundStart);
        for (second, headshot) in [(1, true), (2, false), (3, true)] {
            apply(
                &mut processor,
                &mut store,
                second,
                kill_event(human("arrow", "STEAM_1:0:1"), bot("Dave"), headshot),
            );
        }
        let arrow = &processor.ctx.players["STEAM_1:0:1"];
        assert_eq!(arrow.kills, 3);
        assert_eq!(arrow.headshot_kills, 2);
        assert!(arrow.headshot_kills <= arrow.kills);
    }

    #[test]
    fn in_round_event_before_any_round_start_is_dropped() {
        let mut processor = EventProcessor::new();
        let mut store = MemStore::new();
        apply(
            &mut processor,
            &mut store,
            0,
            kill_event(human("arrow", "STEAM_1:0:1"), human("dmitri", "STEAM_1:0:2"), false),
        );
        assert!(processor.ctx.pending_events.is_empty());
    }

    #[test]
    fn snapshots_deduplicate_to_the_latest_round() {
        let mut processor = EventProcessor::new();
        let mut store = MemStore::new();

        let score = |kills| RoundScore {
            name: "arrow".to_string(),
            slot: 1,
            steamid: "STEAM_1:0:1".to_string(),
            team: Some("CT".to_string()),
            kills,
            deaths: 0,
            assists: 0,
            clutch: false,
        };

        apply(&mut processor, &mut store, 0, EventData::RoundStart);
        apply(
            &mut processor,
            &mut store,
            1,
            kill_event(human("arrow", "STEAM_1:0:1"), bot("Dave"), false),
        );
        apply(
            &mut processor,
            &mut store,
            2,
            EventData::RoundEnd { players: vec![score(1)] },
        );
        apply(&mut processor, &mut store, 3, EventData::RoundStart);
        apply(
            &mut processor,
            &mut store,
            4,
            kill_event(human("arrow", "STEAM_1:0:1"), bot("Dave"), false),
        );
        apply(
            &mut processor,
            &mut store,
            5,
            EventData::RoundEnd { players: vec![score(1)] },
        );

        assert_eq!(processor.ctx.pending_stats.len(), 1);
        let snapshot = &processor.ctx.pending_stats["STEAM_1:0:1"];
        assert_eq!(snapshot.taken_at, at(5));
        assert_eq!(snapshot.state.kills, 2);
        assert_eq!(snapshot.state.rounds_played, 2);
    }

    #[test]
    fn game_over_without_identity_is_fatal() {
        let mut processor = EventProcessor::new();
        let mut store = MemStore::new();
        let result = processor.apply(
            MatchEvent {
                at: at(0),
                data: EventData::GameOver {
                    map: "de_nuke".to_string(),
                    mode: "competitive".to_string(),
                    score1: 1,
                    score2: 0,
                    duration_minutes: None,
                    accolades: Vec::new(),
                },
            },
            &mut store,
        );
        assert!(matches!(result, Err(IngestFatalError::NoServerIdentity)));
    }

    #[test]
    fn accolades_resolve_by_name_and_slot_and_deduplicate() {
        let mut processor = EventProcessor::new();
        let mut store = MemStore::new();
        apply(&mut processor, &mut store, 0, EventData::RoundStart);
        apply(
            &mut processor,
            &mut store,
            1,
            kill_event(human("arrow", "STEAM_1:0:1"), bot("Dave"), false),
        );

        let accolade = |kind: &str, name: &str, slot, position| AccoladeLine {
            kind: kind.to_string(),
            player_name: name.to_string(),
            player_slot: slot,
            value: 1.0,
            position,
            score: 5.0,
        };
        processor.ctx.pending_accolades = vec![
            accolade("3k", "arrow", 1, 1),
            accolade("3k", "arrow", 1, 2),
            accolade("hsp", "arrow", 1, 1),
            // Right name on the wrong slot, and an unknown name on a known
            // slot: neither resolves.
            accolade("4k", "arrow", 5, 1),
            accolade("mvp", "stranger", 1, 1),
        ];

        let linked = processor.link_accolades();
        assert_eq!(linked.len(), 2);
        assert!(linked.iter().all(|a| a.player_id == "STEAM_1:0:1"));
        assert_eq!(linked[0].kind, "3k");
        assert_eq!(linked[0].position, 1);
        assert_eq!(linked[1].kind, "hsp");
    }

    #[test]
    fn duplicate_nicknames_resolve_by_slot() {
        let smurf = |slot, id: &str| Actor {
            name: "smurf".to_string(),
            slot,
            steam_id: Some(id.to_string()),
            team: Some(Team::Defenders),
        };

        let mut processor = EventProcessor::new();
        let mut store = MemStore::new();
        apply(&mut processor, &mut store, 0, EventData::RoundStart);
        apply(
            &mut processor,
            &mut store,
            1,
            kill_event(smurf(2, "STEAM_1:0:21"), bot("Dave"), false),
        );
        apply(
            &mut processor,
            &mut store,
            2,
            kill_event(smurf(3, "STEAM_1:0:31"), bot("Dave"), false),
        );

        processor.ctx.pending_accolades = vec![
            AccoladeLine {
                kind: "mvp".to_string(),
                player_name: "smurf".to_string(),
                player_slot: 3,
                value: 1.0,
                position: 1,
                score: 5.0,
            },
            AccoladeLine {
                kind: "hsp".to_string(),
                player_name: "smurf".to_string(),
                player_slot: 2,
                value: 1.0,
                position: 2,
                score: 3.0,
            },
        ];

        let linked = processor.link_accolades();
        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0].kind, "mvp");
        assert_eq!(linked[0].player_id, "STEAM_1:0:31");
        assert_eq!(linked[1].kind, "hsp");
        assert_eq!(linked[1].player_id, "STEAM_1:0:21");
    }
}
