//! Recognizes raw server log lines. Each line arrives wrapped in a
//! `{"time": …, "log": …}` envelope; the inner string follows the vendor's
//! fixed format and is matched against one recognizer per record kind.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::ingest::event::{
    Actor, AssistKind, BombSite, EventData, MatchEvent, Position, Scorecard, Team,
};
use crate::ingest::event::AccoladeLine;

#[derive(Debug, Deserialize)]
struct Envelope {
    time: DateTime<Utc>,
    log: String,
}

/// `"Name<slot><STEAM_…|BOT><TEAM>"` with capture names under `prefix`.
fn actor_pat(prefix: &str) -> String {
    format!(r#""(?P<{prefix}_name>.+?)<(?P<{prefix}_slot>\d+)><(?P<{prefix}_sid>[^>]*)><(?P<{prefix}_team>[^>]*)>""#)
}

/// `[x y z]`, captured leniently; the contents are validated in Rust so a
/// mangled position degrades to `None` instead of failing the line.
fn pos_pat(prefix: &str) -> String {
    format!(r"\[(?P<{prefix}_pos>[^\]]*)\]")
}

lazy_static! {
    static ref SERVER_IDENTITY: Regex =
        Regex::new(r"ResetBreakpadAppId: Setting dedicated server app id: (\d+)").unwrap();
    static ref ROUND_START: Regex = Regex::new(r#"World triggered "Round_Start""#).unwrap();
    static ref ROUND_END: Regex = Regex::new(r#"World triggered "Round_End""#).unwrap();
    static ref GAME_OVER: Regex =
        Regex::new(r"Game Over: (\S+) \S+ (\S+) score (\d+):(\d+)(?: after (\d+) min)?").unwrap();
    static ref ACCOLADE: Regex = Regex::new(
        r"ACCOLADE, FINAL: \{([^}]+)\},\s*(.+?)<(\d+)>,\s*VALUE: ([0-9.]+),\s*POS: (\d+),\s*SCORE: ([0-9.]+)"
    )
    .unwrap();
    // Attack is tried before Kill: both verbs can appear inside player
    // names, and "attacked" lines carry the richer payload.
    static ref ATTACK: Regex = Regex::new(&format!(
        r#"{a} {ap} attacked {t} {tp} with "(?P<weapon>[^"]+)" \(damage "(?P<damage>\d+)"\) \(damage_armor "(?P<damage_armor>\d+)"\) \(health "(?P<health>\d+)"\) \(armor "[^"]*"\) \(hitgroup "(?P<hitgroup>[^"]+)"\)"#,
        a = actor_pat("a"),
        ap = pos_pat("a"),
        t = actor_pat("t"),
        tp = pos_pat("t"),
    ))
    .unwrap();
    static ref KILL: Regex = Regex::new(&format!(
        r#"{a} {ap} killed {t} {tp} with "(?P<weapon>[^"]+)"(?P<mods>(?:\s*\([^)]*\))*)\s*$"#,
        a = actor_pat("a"),
        ap = pos_pat("a"),
        t = actor_pat("t"),
        tp = pos_pat("t"),
    ))
    .unwrap();
    static ref ASSIST: Regex = Regex::new(&format!(
        r#"{a} (?P<flash>flash-)?assisted killing {t}"#,
        a = actor_pat("a"),
        t = actor_pat("t"),
    ))
    .unwrap();
    static ref BOMB_PLANT: Regex = Regex::new(&format!(
        r#"{a} triggered "Planted_The_Bomb" at bombsite (?P<site>A|B)"#,
        a = actor_pat("a"),
    ))
    .unwrap();
    static ref BOMB_DEFUSE_BEGIN: Regex = Regex::new(&format!(
        r#"{a} triggered "Begin_Bomb_Defuse_(?:With|Without)_Kit""#,
        a = actor_pat("a"),
    ))
    .unwrap();
    static ref BOMB_DEFUSED: Regex =
        Regex::new(r#"Team "CT" triggered "SFUI_Notice_Bomb_Defused""#).unwrap();
    static ref BOMB_EXPLODED: Regex =
        Regex::new(r#"Team "TERRORIST" triggered "SFUI_Notice_Target_Bombed""#).unwrap();
}

fn envelope(raw: &str) -> Option<(DateTime<Utc>, String)> {
    match serde_json::from_str::<Envelope>(raw) {
        Ok(envelope) => Some((envelope.time, envelope.log)),
        Err(err) => {
            debug!("Skipping unparseable line: {err}");
            None
        }
    }
}

fn grab<'c>(caps: &'c Captures, prefix: &str, field: &str) -> &'c str {
    caps.name(&format!("{prefix}_{field}"))
        .map(|m| m.as_str())
        .unwrap_or("")
}

fn actor(caps: &Captures, prefix: &str) -> Actor {
    let steam_id = grab(caps, prefix, "sid");
    Actor {
        name: grab(caps, prefix, "name").to_string(),
        slot: grab(caps, prefix, "slot").parse().unwrap_or(0),
        steam_id: (steam_id != "BOT").then(|| steam_id.to_string()),
        team: Team::from_log(grab(caps, prefix, "team")),
    }
}

fn position(caps: &Captures, prefix: &str) -> Position {
    let coords = grab(caps, prefix, "pos")
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<Vec<i32>, _>>()
        .ok()?;
    match coords[..] {
        [x, y, z] => Some((x, y, z)),
        _ => None,
    }
}

fn kill_modifiers(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(['(', ')']).flat_map(str::split_whitespace)
}

fn accolade_from(caps: &Captures) -> AccoladeLine {
    AccoladeLine {
        kind: caps[1].to_string(),
        player_name: caps[2].to_string(),
        player_slot: caps[3].parse().unwrap_or(0),
        value: caps[4].parse().unwrap_or(0.0),
        position: caps[5].parse().unwrap_or(0),
        score: caps[6].parse().unwrap_or(0.0),
    }
}

/// Recognizes one accolade line without touching any lexer state. The match
/// tracker uses this to scan backwards from a game-over line.
pub fn accolade_line(raw: &str) -> Option<(DateTime<Utc>, AccoladeLine)> {
    let (at, log) = envelope(raw)?;
    let caps = ACCOLADE.captures(&log)?;
    Some((at, accolade_from(&caps)))
}

struct PendingRoundEnd {
    at: DateTime<Utc>,
    buffer: String,
    in_json: bool,
}

/// Lexes one line at a time. The only state is the scorecard accumulator
/// bridging a `Round_End` marker to its `JSON_END` line.
#[derive(Default)]
pub struct Lexer {
    pending_round_end: Option<PendingRoundEnd>,
}

impl Lexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recognizes one enveloped line. Unrecognized lines yield `None`.
    pub fn scan(&mut self, raw: &str) -> Option<MatchEvent> {
        let (at, log) = envelope(raw)?;

        if self.pending_round_end.is_some() {
            return self.scan_scorecard(log);
        }

        if let Some(caps) = SERVER_IDENTITY.captures(&log) {
            let app_server_id = caps[1].parse().ok()?;
            return Some(MatchEvent {
                at,
                data: EventData::ServerIdentity { app_server_id },
            });
        }
        if ROUND_START.is_match(&log) {
            return Some(MatchEvent {
                at,
                data: EventData::RoundStart,
            });
        }
        if ROUND_END.is_match(&log) {
            // The scorecard block follows on its own lines; the round end is
            // emitted once JSON_END closes it.
            self.pending_round_end = Some(PendingRoundEnd {
                at,
                buffer: String::new(),
                in_json: false,
            });
            return None;
        }
        if let Some(caps) = GAME_OVER.captures(&log) {
            return Some(MatchEvent {
                at,
                data: EventData::GameOver {
                    mode: caps[1].to_string(),
                    map: caps[2].to_string(),
                    score1: caps[3].parse().ok()?,
                    score2: caps[4].parse().ok()?,
                    duration_minutes: caps.get(5).and_then(|m| m.as_str().parse().ok()),
                    accolades: Vec::new(),
                },
            });
        }
        if let Some(caps) = ACCOLADE.captures(&log) {
            return Some(MatchEvent {
                at,
                data: EventData::Accolade(accolade_from(&caps)),
            });
        }
        if let Some(caps) = ATTACK.captures(&log) {
            return Some(MatchEvent {
                at,
                data: EventData::Attack {
                    attacker: actor(&caps, "a"),
                    victim: actor(&caps, "t"),
                    weapon: caps["weapon"].to_string(),
                    damage: caps["damage"].parse().ok()?,
                    armor_damage: caps["damage_armor"].parse().ok()?,
                    health_remaining: caps["health"].parse().ok()?,
                    hitgroup: caps["hitgroup"].to_string(),
                    attacker_pos: position(&caps, "a"),
                    victim_pos: position(&caps, "t"),
                },
            });
        }
        if let Some(caps) = KILL.captures(&log) {
            let headshot = kill_modifiers(&caps["mods"]).any(|modifier| modifier == "headshot");
            return Some(MatchEvent {
                at,
                data: EventData::Kill {
                    killer: actor(&caps, "a"),
                    victim: actor(&caps, "t"),
                    weapon: caps["weapon"].to_string(),
                    headshot,
                    killer_pos: position(&caps, "a"),
                    victim_pos: position(&caps, "t"),
                },
            });
        }
        if let Some(caps) = ASSIST.captures(&log) {
            let kind = if caps.name("flash").is_some() {
                AssistKind::Flash
            } else {
                AssistKind::Regular
            };
            return Some(MatchEvent {
                at,
                data: EventData::Assist {
                    assister: actor(&caps, "a"),
                    victim: actor(&caps, "t"),
                    kind,
                },
            });
        }
        if let Some(caps) = BOMB_PLANT.captures(&log) {
            let site = match &caps["site"] {
                "A" => BombSite::A,
                _ => BombSite::B,
            };
            return Some(MatchEvent {
                at,
                data: EventData::BombPlant {
                    player: actor(&caps, "a"),
                    site,
                },
            });
        }
        if let Some(caps) = BOMB_DEFUSE_BEGIN.captures(&log) {
            return Some(MatchEvent {
                at,
                data: EventData::BombDefuseBegin {
                    player: actor(&caps, "a"),
                },
            });
        }
        if BOMB_DEFUSED.is_match(&log) {
            return Some(MatchEvent {
                at,
                data: EventData::BombDefused,
            });
        }
        if BOMB_EXPLODED.is_match(&log) {
            return Some(MatchEvent {
                at,
                data: EventData::BombExploded,
            });
        }

        None
    }

    fn scan_scorecard(&mut self, log: String) -> Option<MatchEvent> {
        let pending = self
            .pending_round_end
            .as_mut()
            .expect("scan_scorecard is only called with a pending round end");

        if log.contains("JSON_BEGIN") {
            pending.in_json = true;
            return None;
        }
        if log.contains("JSON_END") {
            let pending = self.pending_round_end.take().unwrap();
            return Some(finish_round_end(pending));
        }
        if pending.in_json {
            pending.buffer.push_str(&log);
            pending.buffer.push('\n');
            return None;
        }

        // No scorecard followed the marker after all. Close the round end
        // with an empty roster; the interrupting line is dropped.
        let pending = self.pending_round_end.take().unwrap();
        warn!("Round end at {} was not followed by a scorecard block", pending.at);
        Some(finish_round_end(pending))
    }
}

fn finish_round_end(pending: PendingRoundEnd) -> MatchEvent {
    let players = match serde_json::from_str::<Scorecard>(pending.buffer.trim()) {
        Ok(scorecard) => scorecard.players,
        Err(err) => {
            warn!("Discarding unreadable round scorecard: {err}");
            Vec::new()
        }
    };
    MatchEvent {
        at: pending.at,
        data: EventData::RoundEnd { players },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(log: &str) -> String {
        serde_json::json!({ "time": "2024-03-01T20:15:30.123456Z", "log": log }).to_string()
    }

    fn scan_one(log: &str) -> Option<MatchEvent> {
        Lexer::new().scan(&line(log))
    }

    const KILL_LINE: &str = r#""arrow<4><STEAM_1:0:11111><CT>" [100 -200 64] killed "dmitri<7><STEAM_1:1:22222><TERRORIST>" [-50 75 64] with "ak47""#;

    #[test]
    fn envelope_failure_skips_the_line() {
        assert!(Lexer::new().scan("not json at all").is_none());
    }

    #[test]
    fn server_identity_is_recognized() {
        let event =
            scan_one("ResetBreakpadAppId: Setting dedicated server app id: 730").unwrap();
        assert_eq!(event.data, EventData::ServerIdentity { app_server_id: 730 });
    }

    #[test]
    fn kill_without_modifiers_is_not_a_headshot() {
        let event = scan_one(KILL_LINE).unwrap();
        let EventData::Kill {
            killer,
            victim,
            weapon,
            headshot,
            killer_pos,
            victim_pos,
        } = event.data
        else {
            panic!("expected a kill");
        };
        assert_eq!(killer.name, "arrow");
        assert_eq!(killer.steam_id.as_deref(), Some("STEAM_1:0:11111"));
        assert_eq!(killer.team, Some(Team::Defenders));
        assert_eq!(victim.name, "dmitri");
        assert_eq!(victim.team, Some(Team::Attackers));
        assert_eq!(weapon, "ak47");
        assert!(!headshot);
        assert_eq!(killer_pos, Some((100, -200, 64)));
        assert_eq!(victim_pos, Some((-50, 75, 64)));
    }

    #[test]
    fn headshot_modifier_variants() {
        for suffix in [" (headshot)", " (headshot penetrated)", " (headshot throughsmoke)"] {
            let event = scan_one(&format!("{KILL_LINE}{suffix}")).unwrap();
            let EventData::Kill { headshot, .. } = event.data else {
                panic!("expected a kill");
            };
            assert!(headshot, "expected headshot for modifier {suffix:?}");
        }

        let event = scan_one(&format!("{KILL_LINE} (penetrated)")).unwrap();
        let EventData::Kill { headshot, .. } = event.data else {
            panic!("expected a kill");
        };
        assert!(!headshot);
    }

    #[test]
    fn bot_killer_has_no_identity() {
        let event = scan_one(
            r#""Hank<9><BOT><TERRORIST>" [0 0 0] killed "arrow<4><STEAM_1:0:11111><CT>" [1 1 1] with "glock""#,
        )
        .unwrap();
        let EventData::Kill { killer, victim, .. } = event.data else {
            panic!("expected a kill");
        };
        assert!(killer.is_bot());
        assert!(!victim.is_bot());
    }

    #[test]
    fn mangled_position_degrades_to_none() {
        let event = scan_one(
            r#""arrow<4><STEAM_1:0:11111><CT>" [?? -200 64] killed "dmitri<7><STEAM_1:1:22222><TERRORIST>" [-50 75 64] with "ak47""#,
        )
        .unwrap();
        let EventData::Kill { killer_pos, victim_pos, .. } = event.data else {
            panic!("expected a kill");
        };
        assert_eq!(killer_pos, None);
        assert_eq!(victim_pos, Some((-50, 75, 64)));
    }

    #[test]
    fn attack_is_recognized_with_full_payload() {
        let event = scan_one(
            r#""arrow<4><STEAM_1:0:11111><CT>" [100 -200 64] attacked "dmitri<7><STEAM_1:1:22222><TERRORIST>" [-50 75 64] with "glock" (damage "27") (damage_armor "4") (health "73") (armor "94") (hitgroup "stomach")"#,
        )
        .unwrap();
        let EventData::Attack {
            attacker,
            victim,
            weapon,
            damage,
            armor_damage,
            health_remaining,
            hitgroup,
            ..
        } = event.data
        else {
            panic!("expected an attack");
        };
        assert_eq!(attacker.name, "arrow");
        assert_eq!(victim.name, "dmitri");
        assert_eq!(weapon, "glock");
        assert_eq!(damage, 27);
        assert_eq!(armor_damage, 4);
        assert_eq!(health_remaining, 73);
        assert_eq!(hitgroup, "stomach");
    }

    #[test]
    fn attack_wins_over_kill_for_ambiguous_names() {
        // An attacker whose name embeds kill-line structure makes this line
        // match both recognizers; trying Attack first settles it.
        let ambiguous = r#""x<1><STEAM_1:0:1><CT>" [7 7 7] killed "decoy<5><STEAM_1:0:4><CT>" [0 0 0] attacked "dmitri<7><STEAM_1:1:2><TERRORIST>" [8 8 8] with "usp" (damage "9") (damage_armor "0") (health "91") (armor "100") (hitgroup "chest")"#;
        assert!(KILL.is_match(ambiguous));
        assert!(ATTACK.is_match(ambiguous));

        let event = scan_one(ambiguous).unwrap();
        assert!(matches!(event.data, EventData::Attack { .. }));
    }

    #[test]
    fn assist_variants() {
        let event = scan_one(
            r#""arrow<4><STEAM_1:0:11111><CT>" assisted killing "dmitri<7><STEAM_1:1:22222><TERRORIST>""#,
        )
        .unwrap();
        assert!(matches!(
            event.data,
            EventData::Assist { kind: AssistKind::Regular, .. }
        ));

        let event = scan_one(
            r#""arrow<4><STEAM_1:0:11111><CT>" flash-assisted killing "dmitri<7><STEAM_1:1:22222><TERRORIST>""#,
        )
        .unwrap();
        assert!(matches!(
            event.data,
            EventData::Assist { kind: AssistKind::Flash, .. }
        ));
    }

    #[test]
    fn game_over_with_and_without_duration() {
        let event = scan_one(
            "Game Over: competitive mg_active de_anubis score 13:11 after 34 min",
        )
        .unwrap();
        assert_eq!(
            event.data,
            EventData::GameOver {
                mode: "competitive".to_string(),
                map: "de_anubis".to_string(),
                score1: 13,
                score2: 11,
                duration_minutes: Some(34),
                accolades: Vec::new(),
            }
        );

        let event =
            scan_one("Game Over: competitive mg_active de_ancient score 13:2").unwrap();
        let EventData::GameOver { duration_minutes, .. } = event.data else {
            panic!("expected a game over");
        };
        assert_eq!(duration_minutes, None);
    }

    #[test]
    fn accolade_line_is_recognized() {
        let raw = line("ACCOLADE, FINAL: {3k},\tarrow<4>,\tVALUE: 2.000000,\tPOS: 1,\tSCORE: 20.000000");
        let (_, accolade) = accolade_line(&raw).unwrap();
        assert_eq!(accolade.kind, "3k");
        assert_eq!(accolade.player_name, "arrow");
        assert_eq!(accolade.player_slot, 4);
        assert_eq!(accolade.value, 2.0);
        assert_eq!(accolade.position, 1);
        assert_eq!(accolade.score, 20.0);
    }

    #[test]
    fn bomb_lines_are_recognized() {
        let event = scan_one(
            r#""dmitri<7><STEAM_1:1:22222><TERRORIST>" triggered "Planted_The_Bomb" at bombsite B"#,
        )
        .unwrap();
        assert!(matches!(
            event.data,
            EventData::BombPlant { site: BombSite::B, .. }
        ));

        let event = scan_one(
            r#""arrow<4><STEAM_1:0:11111><CT>" triggered "Begin_Bomb_Defuse_Without_Kit""#,
        )
        .unwrap();
        assert!(matches!(event.data, EventData::BombDefuseBegin { .. }));

        let event = scan_one(r#"Team "CT" triggered "SFUI_Notice_Bomb_Defused""#).unwrap();
        assert_eq!(event.data, EventData::BombDefused);

        let event =
            scan_one(r#"Team "TERRORIST" triggered "SFUI_Notice_Target_Bombed""#).unwrap();
        assert_eq!(event.data, EventData::BombExploded);
    }

    #[test]
    fn round_end_scorecard_is_accumulated() {
        let mut lexer = Lexer::new();
        assert!(lexer.scan(&line(r#"World triggered "Round_End""#)).is_none());
        assert!(lexer.scan(&line("JSON_BEGIN")).is_none());
        assert!(lexer.scan(&line(r#"{"players": ["#)).is_none());
        assert!(
            lexer
                .scan(&line(
                    r#"{"name": "arrow", "slot": 4, "steamid": "STEAM_1:0:11111", "team": "CT", "kills": 2, "deaths": 0, "assists": 1, "clutch": true}"#
                ))
                .is_none()
        );
        assert!(lexer.scan(&line("]}")).is_none());
        let event = lexer.scan(&line("JSON_END")).unwrap();

        let EventData::RoundEnd { players } = event.data else {
            panic!("expected a round end");
        };
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name, "arrow");
        assert_eq!(players[0].kills, 2);
        assert!(players[0].clutch);
    }

    #[test]
    fn unreadable_scorecard_degrades_to_empty_roster() {
        let mut lexer = Lexer::new();
        assert!(lexer.scan(&line(r#"World triggered "Round_End""#)).is_none());
        assert!(lexer.scan(&line("JSON_BEGIN")).is_none());
        assert!(lexer.scan(&line("{{{ not json")).is_none());
        let event = lexer.scan(&line("JSON_END")).unwrap();
        assert_eq!(event.data, EventData::RoundEnd { players: Vec::new() });
    }

    #[test]
    fn unrecognized_lines_are_skipped() {
        assert!(scan_one(r#""arrow<4><STEAM_1:0:11111><CT>" say "gg""#).is_none());
        assert!(scan_one("server_cvar: \"sv_cheats\" \"0\"").is_none());
    }
}
