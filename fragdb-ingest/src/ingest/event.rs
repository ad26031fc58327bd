use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Team {
    Attackers,
    Defenders,
}

impl Team {
    /// The team token as the server prints it.
    pub fn from_log(token: &str) -> Option<Self> {
        match token {
            "TERRORIST" => Some(Team::Attackers),
            "CT" => Some(Team::Defenders),
            _ => None,
        }
    }

    pub fn as_log(self) -> &'static str {
        match self {
            Team::Attackers => "TERRORIST",
            Team::Defenders => "CT",
        }
    }
}

/// A player reference exactly as a log line prints it:
/// `"Name<slot><STEAM_…|BOT><TEAM>"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub name: String,
    pub slot: i32,
    /// `None` marks a bot; bots have no persistent identity.
    pub steam_id: Option<String>,
    pub team: Option<Team>,
}

impl Actor {
    pub fn is_bot(&self) -> bool {
        self.steam_id.is_none()
    }
}

/// World coordinates from a `[x y z]` block. `None` when the block didn't
/// parse; a bad position never fails the line.
pub type Position = Option<(i32, i32, i32)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistKind {
    Regular,
    Flash,
}

impl AssistKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssistKind::Regular => "regular",
            AssistKind::Flash => "flash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BombSite {
    A,
    B,
}

impl BombSite {
    pub fn as_str(self) -> &'static str {
        match self {
            BombSite::A => "A",
            BombSite::B => "B",
        }
    }
}

/// One entry of the round-end scorecard block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundScore {
    pub name: String,
    pub slot: i32,
    /// The literal `BOT` for bots.
    pub steamid: String,
    pub team: Option<String>,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    #[serde(default)]
    pub clutch: bool,
}

impl RoundScore {
    pub fn is_bot(&self) -> bool {
        self.steamid == "BOT"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub players: Vec<RoundScore>,
}

/// One `ACCOLADE, FINAL:` summary line. The player is still a name and slot
/// here; resolution to a steam id happens against the match roster.
#[derive(Debug, Clone, PartialEq)]
pub struct AccoladeLine {
    pub kind: String,
    pub player_name: String,
    pub player_slot: i32,
    pub value: f64,
    pub position: i32,
    pub score: f64,
}

/// A recognized log line (or the synthetic `GameProcessed`), stamped with
/// the envelope's wall-clock time.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    pub at: DateTime<Utc>,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    ServerIdentity {
        app_server_id: i64,
    },
    RoundStart,
    RoundEnd {
        players: Vec<RoundScore>,
    },
    Kill {
        killer: Actor,
        victim: Actor,
        weapon: String,
        headshot: bool,
        killer_pos: Position,
        victim_pos: Position,
    },
    Attack {
        attacker: Actor,
        victim: Actor,
        weapon: String,
        damage: i32,
        armor_damage: i32,
        health_remaining: i32,
        hitgroup: String,
        attacker_pos: Position,
        victim_pos: Position,
    },
    Assist {
        assister: Actor,
        victim: Actor,
        kind: AssistKind,
    },
    Accolade(AccoladeLine),
    BombPlant {
        player: Actor,
        site: BombSite,
    },
    BombDefuseBegin {
        player: Actor,
    },
    BombDefused,
    BombExploded,
    GameOver {
        map: String,
        mode: String,
        score1: i32,
        score2: i32,
        duration_minutes: Option<i32>,
        /// Filled by the match tracker from the accolade block above the
        /// game-over line; always empty straight out of the lexer.
        accolades: Vec<AccoladeLine>,
    },
    /// Synthetic: the replay of an accepted match has caught back up with
    /// its game-over line. Never produced by the lexer.
    GameProcessed,
}
